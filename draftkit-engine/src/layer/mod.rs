//! 图层：实体的唯一所有者。
//!
//! 图层按 id 持有实体，每类实体一棵四叉树，另有按 id 索引的撤销日志和一条通知总线。
//! 所有修改都经由图层方法完成，从而保证索引、使用者集合、通知和日志始终一致。

mod membership;
mod mutate;
mod query;
mod replay;
mod split;

pub use query::{FindQuery, MapHit};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use draftkit_config::AppConfig;
use draftkit_core::entity::{Entity, EntityId, EntityKind, Resolver};
use draftkit_core::geometry::{EPSILON, Bounds2D, Point2};
use draftkit_core::quadtree::{Quadtree, QuadtreeLimits};
use draftkit_core::shape::Shape;
use tracing::{debug, trace, warn};

use crate::bus::{ChangeBus, ChangeListener, ListenerId, Subscription};
use crate::errors::LayerError;
use crate::events::{ChangeEvent, Notice, Origin};
use crate::undo::{LogEntry, Replay, UndoLog};

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    /// 进程内唯一的新 id。
    pub fn next() -> Self {
        Self(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// 图层的行为参数，来自配置。
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSettings {
    pub autosplit: bool,
    pub split_tolerance: f64,
    pub snap_tolerance: f64,
    pub limits: QuadtreeLimits,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            autosplit: true,
            split_tolerance: EPSILON,
            snap_tolerance: 1.0,
            limits: QuadtreeLimits::default(),
        }
    }
}

impl LayerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            autosplit: config.drawing.autosplit,
            split_tolerance: config.drawing.split_tolerance,
            snap_tolerance: config.drawing.snap_tolerance,
            limits: QuadtreeLimits {
                max_occupancy: config.quadtree.max_occupancy,
                min_occupancy: config.quadtree.min_occupancy,
                max_depth: config.quadtree.max_depth,
                growth_margin: config.quadtree.growth_margin,
            },
        }
    }
}

/// 每类实体一棵四叉树。
#[derive(Debug)]
pub struct Indices {
    points: Quadtree<EntityId>,
    segments: Quadtree<EntityId>,
    circles: Quadtree<EntityId>,
    arcs: Quadtree<EntityId>,
    hclines: Quadtree<EntityId>,
    vclines: Quadtree<EntityId>,
    aclines: Quadtree<EntityId>,
    clines: Quadtree<EntityId>,
    ccircles: Quadtree<EntityId>,
    polylines: Quadtree<EntityId>,
    texts: Quadtree<EntityId>,
    dimensions: Quadtree<EntityId>,
}

impl Indices {
    fn new(limits: QuadtreeLimits) -> Self {
        Self {
            points: Quadtree::new(limits),
            segments: Quadtree::new(limits),
            circles: Quadtree::new(limits),
            arcs: Quadtree::new(limits),
            hclines: Quadtree::new(limits),
            vclines: Quadtree::new(limits),
            aclines: Quadtree::new(limits),
            clines: Quadtree::new(limits),
            ccircles: Quadtree::new(limits),
            polylines: Quadtree::new(limits),
            texts: Quadtree::new(limits),
            dimensions: Quadtree::new(limits),
        }
    }

    pub fn get(&self, kind: EntityKind) -> &Quadtree<EntityId> {
        match kind {
            EntityKind::Point => &self.points,
            EntityKind::Segment => &self.segments,
            EntityKind::Circle => &self.circles,
            EntityKind::Arc => &self.arcs,
            EntityKind::HCLine => &self.hclines,
            EntityKind::VCLine => &self.vclines,
            EntityKind::ACLine => &self.aclines,
            EntityKind::CLine => &self.clines,
            EntityKind::CCircle => &self.ccircles,
            EntityKind::Polyline => &self.polylines,
            EntityKind::TextBlock => &self.texts,
            EntityKind::Dimension => &self.dimensions,
        }
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut Quadtree<EntityId> {
        match kind {
            EntityKind::Point => &mut self.points,
            EntityKind::Segment => &mut self.segments,
            EntityKind::Circle => &mut self.circles,
            EntityKind::Arc => &mut self.arcs,
            EntityKind::HCLine => &mut self.hclines,
            EntityKind::VCLine => &mut self.vclines,
            EntityKind::ACLine => &mut self.aclines,
            EntityKind::CLine => &mut self.clines,
            EntityKind::CCircle => &mut self.ccircles,
            EntityKind::Polyline => &mut self.polylines,
            EntityKind::TextBlock => &mut self.texts,
            EntityKind::Dimension => &mut self.dimensions,
        }
    }
}

#[derive(Debug)]
pub struct Layer {
    id: LayerId,
    name: String,
    scale: f64,
    parent: Option<LayerId>,
    children: Vec<Layer>,
    entities: HashMap<EntityId, Entity>,
    indices: Indices,
    log: UndoLog,
    bus: ChangeBus,
    settings: LayerSettings,
    /// 回放期间被删除、但仍被标注引用的实体 id → 这些标注。
    dangling: HashMap<EntityId, BTreeSet<EntityId>>,
    /// 正在删除中的实体，防止级联删除回头删除自身。
    deleting: HashSet<EntityId>,
    next_id: u64,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, LayerSettings::default())
    }

    pub fn with_settings(name: impl Into<String>, settings: LayerSettings) -> Self {
        Self {
            id: LayerId::next(),
            name: name.into(),
            scale: 1.0,
            parent: None,
            children: Vec::new(),
            entities: HashMap::new(),
            indices: Indices::new(settings.limits),
            log: UndoLog::new(),
            bus: ChangeBus::new(),
            settings,
            dangling: HashMap::new(),
            deleting: HashSet::new(),
            next_id: 1,
        }
    }

    #[inline]
    pub fn id(&self) -> LayerId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    #[inline]
    pub fn autosplit(&self) -> bool {
        self.settings.autosplit
    }

    #[inline]
    pub fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    #[inline]
    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn indices(&self) -> &Indices {
        &self.indices
    }

    #[inline]
    pub fn undo_log(&self) -> &UndoLog {
        &self.log
    }

    pub fn sublayers(&self) -> impl Iterator<Item = &Layer> {
        self.children.iter()
    }

    pub fn sublayer(&self, id: LayerId) -> Option<&Layer> {
        self.children.iter().find(|child| child.id == id)
    }

    pub fn sublayer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.children.iter_mut().find(|child| child.id == id)
    }

    /// 在本图层及全部后代中查找。
    pub fn find_layer(&self, id: LayerId) -> Option<&Layer> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_layer(id))
    }

    pub fn find_layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        if self.id == id {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_layer_mut(id))
    }

    /// 把 `child` 挂为子图层。已有父图层的图层不能再次挂接。
    pub fn add_sublayer(&mut self, mut child: Layer) -> Result<LayerId, LayerError> {
        if let Some(parent) = child.parent {
            return Err(LayerError::InvalidArgument(format!(
                "{} already belongs to {parent}",
                child.id
            )));
        }
        child.parent = Some(self.id);
        let id = child.id;
        self.children.push(child);
        debug!(layer = %self.id, sublayer = %id, "sublayer added");
        self.notify(Origin::Layer, None, ChangeEvent::SublayerAdded { id }, None, None);
        Ok(id)
    }

    /// 摘下子图层并交还给调用方。
    pub fn del_sublayer(&mut self, id: LayerId) -> Result<Layer, LayerError> {
        let index = self
            .children
            .iter()
            .position(|child| child.id == id)
            .ok_or_else(|| LayerError::NotFound(format!("sublayer {id}")))?;
        let mut child = self.children.remove(index);
        child.parent = None;
        debug!(layer = %self.id, sublayer = %id, "sublayer removed");
        self.notify(Origin::Layer, None, ChangeEvent::SublayerRemoved { id }, None, None);
        Ok(child)
    }

    pub fn connect<L>(&mut self, subscription: Subscription, listener: L) -> ListenerId
    where
        L: ChangeListener + 'static,
    {
        self.bus.connect(subscription, listener)
    }

    pub fn disconnect(&mut self, id: ListenerId) -> bool {
        self.bus.disconnect(id)
    }

    pub fn mute(&mut self, origin: Origin) {
        self.bus.mute(origin);
    }

    pub fn unmute(&mut self, origin: Origin) {
        self.bus.unmute(origin);
    }

    pub fn is_muted(&self, origin: Origin) -> bool {
        self.bus.is_muted(origin)
    }

    /// 开始一个用户可见的撤销步骤，可嵌套。
    pub fn start_action(&mut self) {
        self.log.start_action();
    }

    pub fn end_action(&mut self) {
        self.log.end_action();
    }

    #[inline]
    pub fn can_undo(&self) -> bool {
        self.log.can_undo()
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        self.log.can_redo()
    }

    /// 撤销最近一个动作；没有可撤销的动作时返回 `false`。
    pub fn undo(&mut self) -> Result<bool, LayerError> {
        let Some(record) = self.log.take_undo_action() else {
            return Ok(false);
        };
        debug!(layer = %self.id, action = record.id.get(), "undo");
        for origin in record.sequence.iter().rev().copied() {
            let entry = self
                .log
                .pop_undo_entry(origin, record.id)
                .ok_or_else(|| missing_entry(origin, "undo"))?;
            let inverse = self.execute(Replay::Undo, origin, entry.event)?;
            self.log.push_redo_entry(
                origin,
                LogEntry {
                    action: record.id,
                    event: inverse,
                },
            )?;
        }
        self.log.finish_undo(record);
        Ok(true)
    }

    /// 重做最近撤销的动作；没有可重做的动作时返回 `false`。
    pub fn redo(&mut self) -> Result<bool, LayerError> {
        let Some(record) = self.log.take_redo_action() else {
            return Ok(false);
        };
        debug!(layer = %self.id, action = record.id.get(), "redo");
        for origin in record.sequence.iter().copied() {
            let entry = self
                .log
                .pop_redo_entry(origin, record.id)
                .ok_or_else(|| missing_entry(origin, "redo"))?;
            let inverse = self.execute(Replay::Redo, origin, entry.event)?;
            self.log.push_undo_entry(
                origin,
                LogEntry {
                    action: record.id,
                    event: inverse,
                },
            )?;
        }
        self.log.finish_redo(record);
        Ok(true)
    }

    /// 在隐式动作中执行 `f`，使单次公开调用成为一个撤销步骤。
    /// `f` 失败时回放它已记录的条目，图层回到调用前的状态。
    fn in_action<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, LayerError>,
    ) -> Result<R, LayerError> {
        self.log.start_action();
        let mark = self.log.action_mark();
        let result = f(self);
        if result.is_err() {
            self.roll_back(mark);
        }
        self.log.end_action();
        result
    }

    fn roll_back(&mut self, mark: usize) {
        let Some((action, origins)) = self.log.truncate_action(mark) else {
            return;
        };
        let entries = origins.len();
        for origin in origins.into_iter().rev() {
            let Some(entry) = self.log.pop_undo_entry(origin, action) else {
                continue;
            };
            if let Err(err) = self.execute(Replay::Undo, origin, entry.event) {
                warn!(layer = %self.id, %origin, error = %err, "rollback stopped");
                return;
            }
        }
        debug!(layer = %self.id, action = action.get(), entries, "failed operation rolled back");
    }

    fn allocate_id(&mut self) -> EntityId {
        while self.entities.contains_key(&EntityId::new(self.next_id)) {
            self.next_id += 1;
        }
        let id = EntityId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn bump_next_id(&mut self, id: EntityId) {
        if id.get() >= self.next_id {
            self.next_id = id.get() + 1;
        }
    }

    fn record(&mut self, origin: Origin, event: ChangeEvent, replay: Replay) -> Result<(), LayerError> {
        if replay.is_replaying() {
            return Ok(());
        }
        self.log.record(origin, event)
    }

    fn notify(
        &mut self,
        origin: Origin,
        kind: Option<EntityKind>,
        event: ChangeEvent,
        before: Option<Bounds2D>,
        after: Option<Bounds2D>,
    ) {
        let notice = Notice {
            layer: self.id,
            origin,
            kind,
            event,
            before,
            after,
        };
        self.bus.send_message(&notice);
    }

    fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        self.entities.get(&id).map(Entity::kind)
    }

    fn shape_of(&self, entity: &Entity) -> Option<Shape> {
        entity.geometry().resolve(self)
    }

    fn bounds_for(&self, entity: &Entity) -> Result<Bounds2D, LayerError> {
        match self.shape_of(entity) {
            Some(shape) => Ok(shape.bounds()),
            None => {
                let missing = entity
                    .geometry()
                    .references()
                    .into_iter()
                    .find(|id| !self.entities.contains_key(id))
                    .unwrap_or(EntityId::new(0));
                Err(LayerError::MissingReference { missing })
            }
        }
    }

    /// 按当前几何重新登记实体的包围盒，返回新包围盒。
    fn reindex(&mut self, id: EntityId) -> Result<Bounds2D, LayerError> {
        let entity = self.entities.get(&id).ok_or(LayerError::NotMember(id))?;
        let kind = entity.kind();
        let bounds = self.bounds_for(entity)?;
        self.index_entity(kind, id, bounds)?;
        trace!(layer = %self.id, id = %id, kind = %kind, "reindexed");
        Ok(bounds)
    }

    /// 以 `bounds` 登记实体，替换已有的登记。空的或含 NaN 的包围盒无法登记，
    /// 此时保留原有登记。
    fn index_entity(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        bounds: Bounds2D,
    ) -> Result<(), LayerError> {
        let index = self.indices.get_mut(kind);
        let previous = index.bounds_of(&id);
        index.del_object(&id);
        if index.add_object(id, bounds) {
            return Ok(());
        }
        if let Some(previous) = previous {
            index.add_object(id, previous);
        }
        Err(LayerError::InvalidArgument(format!(
            "{kind} {id} cannot be indexed with bounds {bounds:?}"
        )))
    }

    fn indexed_bounds(&self, id: EntityId) -> Option<Bounds2D> {
        let kind = self.kind_of(id)?;
        self.indices.get(kind).bounds_of(&id)
    }

    fn point_location(&self, id: EntityId) -> Option<Point2> {
        self.entities.get(&id).and_then(Entity::location)
    }
}

impl Resolver for Layer {
    fn point(&self, id: EntityId) -> Option<Point2> {
        self.point_location(id)
    }

    fn circle(&self, id: EntityId) -> Option<(Point2, f64)> {
        let (center, radius) = self.entities.get(&id)?.circle_parameters()?;
        Some((self.point_location(center)?, radius))
    }
}

fn missing_entry(origin: Origin, direction: &str) -> LayerError {
    LayerError::Replay {
        origin,
        source: Box::new(LayerError::NotFound(format!("{direction} entry"))),
    }
}

/// 去重但保持首次出现的顺序。
fn unique(ids: Vec<EntityId>) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
