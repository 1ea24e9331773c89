//! 撤销/重做日志。
//!
//! 每个实体有自己的 `EntityLog`，图层结构（增删子实体、图层属性）另有一份。
//! 一次用户可见的操作（action）可能在多个日志中各留下若干条目，
//! `ActionRecord` 按记录顺序保存这些条目所在的日志，撤销时逆序回放。

use std::collections::HashMap;

use draftkit_core::entity::EntityId;
use tracing::trace;

use crate::errors::LayerError;
use crate::events::{ChangeEvent, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub action: ActionId,
    pub event: ChangeEvent,
}

#[derive(Debug, Clone, Default)]
pub struct EntityLog {
    undo: Vec<LogEntry>,
    redo: Vec<LogEntry>,
}

impl EntityLog {
    pub fn save_undo_data(&mut self, action: ActionId, event: ChangeEvent) {
        self.undo.push(LogEntry { action, event });
    }

    /// 弹出属于 `action` 的最新撤销条目。
    pub fn pop_undo(&mut self, action: ActionId) -> Option<LogEntry> {
        if self.undo.last()?.action != action {
            return None;
        }
        self.undo.pop()
    }

    pub fn pop_redo(&mut self, action: ActionId) -> Option<LogEntry> {
        if self.redo.last()?.action != action {
            return None;
        }
        self.redo.pop()
    }

    pub fn push_undo(&mut self, entry: LogEntry) {
        self.undo.push(entry);
    }

    pub fn push_redo(&mut self, entry: LogEntry) {
        self.redo.push(entry);
    }

    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    #[inline]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[inline]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn undo_entries(&self) -> &[LogEntry] {
        &self.undo
    }

    pub fn redo_entries(&self) -> &[LogEntry] {
        &self.redo
    }
}

/// 变更是否来自撤销/重做回放。回放期间不记录日志、不自动分割、不清理无用点。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Replay {
    #[default]
    None,
    Undo,
    Redo,
}

impl Replay {
    #[inline]
    pub fn is_replaying(self) -> bool {
        self != Replay::None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub id: ActionId,
    pub sequence: Vec<Origin>,
}

/// 图层持有的全部撤销状态。
#[derive(Debug, Default)]
pub struct UndoLog {
    attached: HashMap<EntityId, EntityLog>,
    /// 已删除实体的日志，同 id 的实体重新加入时取回。
    detached: HashMap<EntityId, EntityLog>,
    structure: EntityLog,
    undo_actions: Vec<ActionRecord>,
    redo_actions: Vec<ActionRecord>,
    current: Option<ActionRecord>,
    depth: usize,
    next_action: u64,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为加入图层的实体挂接日志，存在同 id 的已分离日志时复用它。
    pub fn attach(&mut self, id: EntityId) -> Result<(), LayerError> {
        if self.attached.contains_key(&id) {
            return Err(LayerError::DuplicateUndoKey(id));
        }
        let log = self.detached.remove(&id).unwrap_or_default();
        self.attached.insert(id, log);
        Ok(())
    }

    pub fn detach(&mut self, id: EntityId) -> bool {
        match self.attached.remove(&id) {
            Some(log) => {
                self.detached.insert(id, log);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn is_attached(&self, id: EntityId) -> bool {
        self.attached.contains_key(&id)
    }

    #[inline]
    pub fn is_detached(&self, id: EntityId) -> bool {
        self.detached.contains_key(&id)
    }

    pub fn log(&self, origin: Origin) -> Option<&EntityLog> {
        match origin {
            Origin::Layer => Some(&self.structure),
            Origin::Entity(id) => self.attached.get(&id).or_else(|| self.detached.get(&id)),
        }
    }

    fn log_mut(&mut self, origin: Origin) -> Option<&mut EntityLog> {
        match origin {
            Origin::Layer => Some(&mut self.structure),
            Origin::Entity(id) => match self.attached.get_mut(&id) {
                Some(log) => Some(log),
                None => self.detached.get_mut(&id),
            },
        }
    }

    /// 开始一个动作；嵌套调用并入最外层动作。
    pub fn start_action(&mut self) -> ActionId {
        self.depth += 1;
        if let Some(current) = &self.current {
            return current.id;
        }
        self.next_action += 1;
        let id = ActionId(self.next_action);
        self.current = Some(ActionRecord {
            id,
            sequence: Vec::new(),
        });
        id
    }

    /// 结束动作。最外层结束且记录了条目时返回动作 id。
    pub fn end_action(&mut self) -> Option<ActionId> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return None;
        }
        let record = self.current.take()?;
        if record.sequence.is_empty() {
            return None;
        }
        let id = record.id;
        trace!(action = id.get(), entries = record.sequence.len(), "action closed");
        self.undo_actions.push(record);
        Some(id)
    }

    #[inline]
    pub fn in_action(&self) -> bool {
        self.current.is_some()
    }

    /// 当前动作已记录的条目数，作为 `truncate_action` 的回退点。
    pub(crate) fn action_mark(&self) -> usize {
        self.current.as_ref().map_or(0, |record| record.sequence.len())
    }

    /// 从当前动作中摘下 `mark` 之后的条目来源（按记录顺序）。
    /// 条目本身仍在各日志的撤销栈顶，由调用方逐条弹出并回放。
    pub(crate) fn truncate_action(&mut self, mark: usize) -> Option<(ActionId, Vec<Origin>)> {
        let current = self.current.as_mut()?;
        if current.sequence.len() <= mark {
            return None;
        }
        Some((current.id, current.sequence.split_off(mark)))
    }

    /// 记录一条新变更，同时清空全部重做历史。
    pub fn record(&mut self, origin: Origin, event: ChangeEvent) -> Result<(), LayerError> {
        if !event.is_logged() {
            return Ok(());
        }
        if self.log(origin).is_none() {
            return Err(LayerError::NotFound(format!("undo log for {origin}")));
        }
        let implicit = self.current.is_none();
        if implicit {
            self.start_action();
        }
        self.clear_redo();
        let Some(action) = self.current.as_ref().map(|record| record.id) else {
            return Err(LayerError::InvalidArgument("no open action".to_string()));
        };
        let log = self
            .log_mut(origin)
            .ok_or_else(|| LayerError::NotFound(format!("undo log for {origin}")))?;
        log.save_undo_data(action, event);
        if let Some(current) = self.current.as_mut() {
            current.sequence.push(origin);
        }
        if implicit {
            self.end_action();
        }
        Ok(())
    }

    fn clear_redo(&mut self) {
        if self.redo_actions.is_empty() {
            return;
        }
        self.redo_actions.clear();
        self.structure.clear_redo();
        for log in self.attached.values_mut().chain(self.detached.values_mut()) {
            log.clear_redo();
        }
    }

    #[inline]
    pub fn can_undo(&self) -> bool {
        !self.undo_actions.is_empty()
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        !self.redo_actions.is_empty()
    }

    #[inline]
    pub fn undo_depth(&self) -> usize {
        self.undo_actions.len()
    }

    #[inline]
    pub fn redo_depth(&self) -> usize {
        self.redo_actions.len()
    }

    pub(crate) fn take_undo_action(&mut self) -> Option<ActionRecord> {
        self.undo_actions.pop()
    }

    pub(crate) fn take_redo_action(&mut self) -> Option<ActionRecord> {
        self.redo_actions.pop()
    }

    pub(crate) fn finish_undo(&mut self, record: ActionRecord) {
        self.redo_actions.push(record);
    }

    pub(crate) fn finish_redo(&mut self, record: ActionRecord) {
        self.undo_actions.push(record);
    }

    pub(crate) fn pop_undo_entry(&mut self, origin: Origin, action: ActionId) -> Option<LogEntry> {
        self.log_mut(origin)?.pop_undo(action)
    }

    pub(crate) fn pop_redo_entry(&mut self, origin: Origin, action: ActionId) -> Option<LogEntry> {
        self.log_mut(origin)?.pop_redo(action)
    }

    pub(crate) fn push_undo_entry(&mut self, origin: Origin, entry: LogEntry) -> Result<(), LayerError> {
        self.log_mut(origin)
            .ok_or_else(|| LayerError::NotFound(format!("undo log for {origin}")))?
            .push_undo(entry);
        Ok(())
    }

    pub(crate) fn push_redo_entry(&mut self, origin: Origin, entry: LogEntry) -> Result<(), LayerError> {
        self.log_mut(origin)
            .ok_or_else(|| LayerError::NotFound(format!("undo log for {origin}")))?
            .push_redo(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> EntityId {
        EntityId::new(raw)
    }

    #[test]
    fn attach_reuses_detached_log() {
        let mut log = UndoLog::new();
        log.attach(id(1)).unwrap();
        assert!(matches!(
            log.attach(id(1)),
            Err(LayerError::DuplicateUndoKey(_))
        ));
        log.record(Origin::Entity(id(1)), ChangeEvent::RadiusChanged { old: 2.0 })
            .unwrap();
        assert!(log.detach(id(1)));
        assert!(log.is_detached(id(1)));
        assert!(!log.detach(id(1)));

        log.attach(id(1)).unwrap();
        assert!(log.is_attached(id(1)));
        assert_eq!(log.log(Origin::Entity(id(1))).unwrap().undo_len(), 1);
    }

    #[test]
    fn nested_actions_form_one_step() {
        let mut log = UndoLog::new();
        log.attach(id(1)).unwrap();
        let outer = log.start_action();
        let inner = log.start_action();
        assert_eq!(outer, inner);
        log.record(Origin::Entity(id(1)), ChangeEvent::RadiusChanged { old: 1.0 })
            .unwrap();
        log.record(Origin::Layer, ChangeEvent::ChildAdded { id: id(1) })
            .unwrap();
        assert_eq!(log.end_action(), None);
        assert_eq!(log.end_action(), Some(outer));
        assert_eq!(log.undo_depth(), 1);

        let record = log.take_undo_action().unwrap();
        assert_eq!(record.sequence, vec![Origin::Entity(id(1)), Origin::Layer]);
    }

    #[test]
    fn empty_actions_are_dropped_and_derived_events_not_logged() {
        let mut log = UndoLog::new();
        log.start_action();
        log.record(
            Origin::Layer,
            ChangeEvent::Translated { dx: 1.0, dy: 0.0 },
        )
        .unwrap();
        assert_eq!(log.end_action(), None);
        assert!(!log.can_undo());
    }

    #[test]
    fn truncation_keeps_entries_before_the_mark() {
        let mut log = UndoLog::new();
        log.attach(id(1)).unwrap();
        let action = log.start_action();
        log.record(Origin::Entity(id(1)), ChangeEvent::RadiusChanged { old: 1.0 })
            .unwrap();
        let mark = log.action_mark();
        assert_eq!(mark, 1);
        log.record(Origin::Entity(id(1)), ChangeEvent::RadiusChanged { old: 2.0 })
            .unwrap();
        log.record(Origin::Layer, ChangeEvent::ChildAdded { id: id(1) })
            .unwrap();

        let (truncated, origins) = log.truncate_action(mark).unwrap();
        assert_eq!(truncated, action);
        assert_eq!(origins, vec![Origin::Entity(id(1)), Origin::Layer]);
        assert!(log.truncate_action(mark).is_none());
        assert_eq!(log.end_action(), Some(action));
        assert_eq!(log.take_undo_action().unwrap().sequence.len(), 1);
    }

    #[test]
    fn recording_clears_redo_history() {
        let mut log = UndoLog::new();
        log.attach(id(1)).unwrap();
        log.record(Origin::Entity(id(1)), ChangeEvent::RadiusChanged { old: 1.0 })
            .unwrap();
        let record = log.take_undo_action().unwrap();
        let entry = log.pop_undo_entry(Origin::Entity(id(1)), record.id).unwrap();
        log.push_redo_entry(Origin::Entity(id(1)), entry).unwrap();
        log.finish_undo(record);
        assert!(log.can_redo());

        log.record(Origin::Entity(id(1)), ChangeEvent::RadiusChanged { old: 3.0 })
            .unwrap();
        assert!(!log.can_redo());
        assert_eq!(log.log(Origin::Entity(id(1))).unwrap().redo_len(), 0);
    }
}
