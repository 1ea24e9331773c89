//! 变更通知总线。
//!
//! 监听者按来源和/或信号订阅。同一 (来源, 信号) 上嵌套的
//! `start_change`/`end_change` 会被合并，只有最外层一对触发
//! `change_pending`/`change_complete`。

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use draftkit_core::geometry::Bounds2D;
use tracing::trace;

use crate::events::{Notice, Origin, Signal};

/// 变更监听者。回调中不能再修改发出通知的图层。
pub trait ChangeListener {
    fn change_pending(&mut self, _origin: Origin, _signal: Signal) {}

    fn change_complete(&mut self, _origin: Origin, _signal: Signal) {}

    fn notify(&mut self, notice: &Notice);
}

/// 调用方保留 `Rc` 的另一份克隆，以便在通知结束后读取监听者的状态。
impl<L: ChangeListener + ?Sized> ChangeListener for Rc<RefCell<L>> {
    fn change_pending(&mut self, origin: Origin, signal: Signal) {
        self.borrow_mut().change_pending(origin, signal);
    }

    fn change_complete(&mut self, origin: Origin, signal: Signal) {
        self.borrow_mut().change_complete(origin, signal);
    }

    fn notify(&mut self, notice: &Notice) {
        self.borrow_mut().notify(notice);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// 订阅过滤条件，未设置的维度匹配全部。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    origins: Option<BTreeSet<Origin>>,
    signals: Option<BTreeSet<Signal>>,
}

impl Subscription {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origins.get_or_insert_with(BTreeSet::new).insert(origin);
        self
    }

    pub fn signal(mut self, signal: Signal) -> Self {
        self.signals.get_or_insert_with(BTreeSet::new).insert(signal);
        self
    }

    pub fn matches(&self, origin: Origin, signal: Signal) -> bool {
        self.origins.as_ref().is_none_or(|set| set.contains(&origin))
            && self.signals.as_ref().is_none_or(|set| set.contains(&signal))
    }
}

struct Connection {
    id: ListenerId,
    subscription: Subscription,
    listener: Box<dyn ChangeListener>,
}

#[derive(Default)]
pub struct ChangeBus {
    connections: Vec<Connection>,
    next_listener: u64,
    open: HashMap<(Origin, Signal), usize>,
    muted: HashSet<Origin>,
    ignored: HashSet<(Origin, Signal)>,
}

impl fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBus")
            .field("listeners", &self.connections.len())
            .field("open", &self.open)
            .field("muted", &self.muted)
            .field("ignored", &self.ignored)
            .finish()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect<L>(&mut self, subscription: Subscription, listener: L) -> ListenerId
    where
        L: ChangeListener + 'static,
    {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.connections.push(Connection {
            id,
            subscription,
            listener: Box::new(listener),
        });
        id
    }

    pub fn disconnect(&mut self, id: ListenerId) -> bool {
        let before = self.connections.len();
        self.connections.retain(|connection| connection.id != id);
        self.connections.len() != before
    }

    #[inline]
    pub fn listener_count(&self) -> usize {
        self.connections.len()
    }

    pub fn start_change(&mut self, origin: Origin, signal: Signal) {
        let nested = {
            let depth = self.open.entry((origin, signal)).or_insert(0);
            *depth += 1;
            *depth > 1
        };
        if nested || self.is_suppressed(origin, signal) {
            return;
        }
        for connection in &mut self.connections {
            if connection.subscription.matches(origin, signal) {
                connection.listener.change_pending(origin, signal);
            }
        }
    }

    pub fn end_change(&mut self, origin: Origin, signal: Signal) {
        let Some(depth) = self.open.get_mut(&(origin, signal)) else {
            trace!(%origin, ?signal, "end_change without matching start_change");
            return;
        };
        *depth -= 1;
        if *depth > 0 {
            return;
        }
        self.open.remove(&(origin, signal));
        if self.is_suppressed(origin, signal) {
            return;
        }
        for connection in &mut self.connections {
            if connection.subscription.matches(origin, signal) {
                connection.listener.change_complete(origin, signal);
            }
        }
    }

    /// 当前是否处于 (来源, 信号) 的变更括号内。
    pub fn is_changing(&self, origin: Origin, signal: Signal) -> bool {
        self.open.contains_key(&(origin, signal))
    }

    pub fn send_message(&mut self, notice: &Notice) {
        let signal = notice.signal();
        if self.is_suppressed(notice.origin, signal) {
            return;
        }
        for connection in &mut self.connections {
            if connection.subscription.matches(notice.origin, signal) {
                connection.listener.notify(notice);
            }
        }
    }

    pub fn mute(&mut self, origin: Origin) {
        self.muted.insert(origin);
    }

    pub fn unmute(&mut self, origin: Origin) {
        self.muted.remove(&origin);
    }

    #[inline]
    pub fn is_muted(&self, origin: Origin) -> bool {
        self.muted.contains(&origin)
    }

    /// 暂时屏蔽某个来源上的某个信号，用于防止变更在处理自身时再次触发。
    pub fn ignore(&mut self, origin: Origin, signal: Signal) {
        self.ignored.insert((origin, signal));
    }

    pub fn receive(&mut self, origin: Origin, signal: Signal) {
        self.ignored.remove(&(origin, signal));
    }

    #[inline]
    pub fn is_ignored(&self, origin: Origin, signal: Signal) -> bool {
        self.ignored.contains(&(origin, signal))
    }

    fn is_suppressed(&self, origin: Origin, signal: Signal) -> bool {
        self.muted.contains(&origin) || self.ignored.contains(&(origin, signal))
    }
}

/// 累积需要重绘的区域。
#[derive(Debug, Default)]
pub struct RedrawTracker {
    dirty: Option<Bounds2D>,
    full_redraw: bool,
}

impl RedrawTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出并清空累积的脏区域。
    pub fn take_dirty(&mut self) -> Option<Bounds2D> {
        self.full_redraw = false;
        self.dirty.take()
    }

    /// 涉及无限长构造线时只能整屏重绘。
    #[inline]
    pub fn needs_full_redraw(&self) -> bool {
        self.full_redraw
    }

    fn include(&mut self, bounds: &Bounds2D) {
        if bounds.is_empty() {
            return;
        }
        if !bounds.is_finite() {
            self.full_redraw = true;
            return;
        }
        self.dirty
            .get_or_insert_with(Bounds2D::empty)
            .include_bounds(bounds);
    }
}

impl ChangeListener for RedrawTracker {
    fn notify(&mut self, notice: &Notice) {
        for bounds in [notice.before, notice.after].into_iter().flatten() {
            self.include(&bounds);
        }
    }
}

/// 按顺序记录收到的一切，用于诊断和测试。
#[derive(Debug, Default)]
pub struct ChangeRecorder {
    pub pending: Vec<(Origin, Signal)>,
    pub completed: Vec<(Origin, Signal)>,
    pub notices: Vec<Notice>,
}

impl ChangeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.completed.clear();
        self.notices.clear();
    }
}

impl ChangeListener for ChangeRecorder {
    fn change_pending(&mut self, origin: Origin, signal: Signal) {
        self.pending.push((origin, signal));
    }

    fn change_complete(&mut self, origin: Origin, signal: Signal) {
        self.completed.push((origin, signal));
    }

    fn notify(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeEvent;
    use crate::layer::LayerId;
    use draftkit_core::entity::EntityId;
    use draftkit_core::geometry::Point2;

    fn notice(origin: Origin, before: Option<Bounds2D>, after: Option<Bounds2D>) -> Notice {
        Notice {
            layer: LayerId::next(),
            origin,
            kind: None,
            event: ChangeEvent::Moved {
                old: Point2::new(0.0, 0.0),
            },
            before,
            after,
        }
    }

    #[test]
    fn nested_changes_notify_once() {
        let recorder = Rc::new(RefCell::new(ChangeRecorder::new()));
        let mut bus = ChangeBus::new();
        bus.connect(Subscription::all(), Rc::clone(&recorder));

        let origin = Origin::Entity(EntityId::new(1));
        bus.start_change(origin, Signal::Moved);
        bus.start_change(origin, Signal::Moved);
        assert!(bus.is_changing(origin, Signal::Moved));
        bus.end_change(origin, Signal::Moved);
        bus.end_change(origin, Signal::Moved);
        assert!(!bus.is_changing(origin, Signal::Moved));

        let recorder = recorder.borrow();
        assert_eq!(recorder.pending, vec![(origin, Signal::Moved)]);
        assert_eq!(recorder.completed, vec![(origin, Signal::Moved)]);
    }

    #[test]
    fn subscriptions_filter_and_mute_suppresses() {
        let first = Origin::Entity(EntityId::new(1));
        let second = Origin::Entity(EntityId::new(2));
        let recorder = Rc::new(RefCell::new(ChangeRecorder::new()));
        let mut bus = ChangeBus::new();
        let id = bus.connect(
            Subscription::all().origin(first).signal(Signal::Moved),
            Rc::clone(&recorder),
        );

        bus.send_message(&notice(first, None, None));
        bus.send_message(&notice(second, None, None));
        assert_eq!(recorder.borrow().notices.len(), 1);

        bus.mute(first);
        bus.send_message(&notice(first, None, None));
        bus.unmute(first);
        bus.ignore(first, Signal::Moved);
        bus.send_message(&notice(first, None, None));
        bus.receive(first, Signal::Moved);
        assert_eq!(recorder.borrow().notices.len(), 1);

        assert!(bus.disconnect(id));
        assert!(!bus.disconnect(id));
        bus.send_message(&notice(first, None, None));
        assert_eq!(recorder.borrow().notices.len(), 1);
    }

    #[test]
    fn redraw_tracker_accumulates_bounds() {
        let tracker = Rc::new(RefCell::new(RedrawTracker::new()));
        let mut bus = ChangeBus::new();
        bus.connect(Subscription::all(), Rc::clone(&tracker));
        let origin = Origin::Entity(EntityId::new(3));
        bus.send_message(&notice(
            origin,
            Some(Bounds2D::from_coords(0.0, 0.0, 1.0, 1.0)),
            Some(Bounds2D::from_coords(5.0, 5.0, 6.0, 7.0)),
        ));
        let dirty = tracker.borrow_mut().take_dirty().unwrap();
        assert_eq!(dirty, Bounds2D::from_coords(0.0, 0.0, 6.0, 7.0));
        assert!(tracker.borrow_mut().take_dirty().is_none());

        bus.send_message(&notice(
            origin,
            None,
            Some(Bounds2D::new(
                Point2::new(f64::NEG_INFINITY, 1.0),
                Point2::new(f64::INFINITY, 1.0),
            )),
        ));
        assert!(tracker.borrow().needs_full_redraw());
    }
}
