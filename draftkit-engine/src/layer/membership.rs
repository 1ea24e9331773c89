use std::collections::HashSet;

use draftkit_core::entity::{Entity, EntityId, EntityKind};
use tracing::{debug, warn};

use super::{Layer, unique};
use crate::errors::LayerError;
use crate::events::{ChangeEvent, Origin, Signal};
use crate::undo::Replay;

impl Layer {
    /// 加入实体并返回其 id。被引用的实体必须已在本图层中。
    pub fn add_object(&mut self, entity: Entity) -> Result<EntityId, LayerError> {
        self.add_object_with(entity, None)
    }

    /// 同 `add_object`，`autosplit` 为 `Some` 时覆盖图层的自动分割开关。
    pub fn add_object_with(
        &mut self,
        entity: Entity,
        autosplit: Option<bool>,
    ) -> Result<EntityId, LayerError> {
        self.in_action(|layer| layer.insert_entity(entity, Replay::None, autosplit))
    }

    /// 删除实体。先级联删除其使用者，再清理因此不再被使用的点。
    pub fn del_object(&mut self, id: EntityId) -> Result<(), LayerError> {
        if !self.entities.contains_key(&id) {
            return Err(LayerError::NotMember(id));
        }
        if let Some(locked) = self.locked_in_cascade(id) {
            warn!(layer = %self.id, id = %id, locked = %locked, "delete refused");
            return Err(LayerError::Locked(locked));
        }
        self.in_action(|layer| layer.delete_entity(id, Replay::None).map(|_| ()))
    }

    /// 实体存在，且它和级联删除会波及的实体都未锁定。
    pub fn can_delete(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id) && self.locked_in_cascade(id).is_none()
    }

    fn locked_in_cascade(&self, id: EntityId) -> Option<EntityId> {
        let mut stack = vec![id];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(entity) = self.entities.get(&current) else {
                continue;
            };
            if entity.is_locked() {
                return Some(current);
            }
            stack.extend(entity.users());
        }
        None
    }

    pub(super) fn insert_entity(
        &mut self,
        mut entity: Entity,
        replay: Replay,
        autosplit: Option<bool>,
    ) -> Result<EntityId, LayerError> {
        entity.geometry().validate()?;
        if let Some(id) = entity.id() {
            if let Some(existing) = self.entities.get(&id) {
                if *existing == entity {
                    return Ok(id);
                }
                return Err(LayerError::InvalidArgument(format!(
                    "id {id} is already used by a {}",
                    existing.kind()
                )));
            }
        }

        let kind = entity.kind();
        let references = unique(entity.geometry().references());
        let mut missing = Vec::new();
        for reference in &references {
            match self.entities.get(reference) {
                Some(target) => check_reference(&entity, target, *reference)?,
                None if kind == EntityKind::Dimension && replay.is_replaying() => {
                    missing.push(*reference);
                }
                None => return Err(LayerError::MissingReference { missing: *reference }),
            }
        }
        let bounds = self.bounds_for(&entity)?;

        let id = match entity.id() {
            Some(id) => id,
            None => self.allocate_id(),
        };
        self.index_entity(kind, id, bounds)?;
        if let Err(err) = self.log.attach(id) {
            self.indices.get_mut(kind).del_object(&id);
            return Err(err);
        }
        self.bump_next_id(id);
        entity.assign_id(id);
        entity.clear_users();
        let mut restored = false;
        if let Some(users) = self.dangling.remove(&id) {
            for user in users {
                if self.entities.contains_key(&user) {
                    restored |= entity.store_user(user);
                }
            }
        }
        for reference in &references {
            if let Some(target) = self.entities.get_mut(reference) {
                target.store_user(id);
            }
        }
        for reference in missing {
            self.dangling.entry(reference).or_default().insert(id);
        }

        self.entities.insert(id, entity);

        self.bus.start_change(Origin::Layer, Signal::Added);
        let recorded = self.record(Origin::Layer, ChangeEvent::ChildAdded { id }, replay);
        self.notify(
            Origin::Layer,
            Some(kind),
            ChangeEvent::ChildAdded { id },
            None,
            Some(bounds),
        );
        self.bus.end_change(Origin::Layer, Signal::Added);
        recorded?;
        debug!(layer = %self.id, id = %id, kind = %kind, ?replay, "entity added");
        // 重新加入的点让悬空的标注恢复完整。
        if restored {
            self.refresh_users(id)?;
        }

        let split = autosplit.unwrap_or(self.settings.autosplit);
        if kind == EntityKind::Point && split && !replay.is_replaying() {
            self.split_at_point(id)?;
        }
        Ok(id)
    }

    pub(super) fn delete_entity(
        &mut self,
        id: EntityId,
        replay: Replay,
    ) -> Result<Entity, LayerError> {
        if !self.entities.contains_key(&id) {
            return Err(LayerError::NotMember(id));
        }
        if !self.deleting.insert(id) {
            return Err(LayerError::InvalidArgument(format!(
                "entity {id} is already being deleted"
            )));
        }
        let result = self.delete_entity_inner(id, replay);
        self.deleting.remove(&id);
        result
    }

    fn delete_entity_inner(&mut self, id: EntityId, replay: Replay) -> Result<Entity, LayerError> {
        let users: Vec<EntityId> = self
            .entities
            .get(&id)
            .map(|entity| entity.users().collect())
            .unwrap_or_default();
        let (dimensions, others): (Vec<EntityId>, Vec<EntityId>) = users
            .into_iter()
            .partition(|user| self.kind_of(*user) == Some(EntityKind::Dimension));

        if replay.is_replaying() {
            if !others.is_empty() {
                warn!(layer = %self.id, id = %id, users = others.len(), "replayed delete of an entity in use");
                return Err(LayerError::InUse {
                    id,
                    users: others.len(),
                });
            }
            // 标注允许暂时悬空，实体重新加入时恢复。
            if !dimensions.is_empty() {
                self.dangling
                    .entry(id)
                    .or_default()
                    .extend(dimensions.iter().copied());
            }
        } else {
            for user in others.into_iter().chain(dimensions.iter().copied()) {
                if self.entities.contains_key(&user) && !self.deleting.contains(&user) {
                    self.delete_entity(user, replay)?;
                }
            }
        }

        let mut entity = self.entities.remove(&id).ok_or(LayerError::NotMember(id))?;
        let kind = entity.kind();
        let before = self.indices.get(kind).bounds_of(&id);
        self.indices.get_mut(kind).del_object(&id);

        let references = unique(entity.geometry().references());
        for reference in &references {
            match self.entities.get_mut(reference) {
                Some(target) => {
                    target.free_user(id);
                }
                None => {
                    if let Some(users) = self.dangling.get_mut(reference) {
                        users.remove(&id);
                        if users.is_empty() {
                            self.dangling.remove(reference);
                        }
                    }
                }
            }
        }
        self.log.detach(id);
        entity.clear_users();

        let event = ChangeEvent::ChildRemoved {
            entity: Box::new(entity.clone()),
        };
        self.bus.start_change(Origin::Layer, Signal::Removed);
        let recorded = self.record(Origin::Layer, event.clone(), replay);
        self.notify(Origin::Layer, Some(kind), event, before, None);
        self.bus.end_change(Origin::Layer, Signal::Removed);
        recorded?;
        debug!(layer = %self.id, id = %id, kind = %kind, ?replay, "entity removed");

        if replay.is_replaying() {
            self.refresh_dangling(id, &dimensions)?;
        }

        if !replay.is_replaying() && kind != EntityKind::Dimension {
            for reference in references {
                let unused = self.entities.get(&reference).is_some_and(|target| {
                    target.kind() == EntityKind::Point && !target.has_users() && !target.is_locked()
                });
                if unused && !self.deleting.contains(&reference) {
                    self.delete_entity(reference, replay)?;
                }
            }
        }
        Ok(entity)
    }

    /// 被引用实体在回放中删除后，悬空标注按剩余的锚点重新索引。
    fn refresh_dangling(&mut self, reference: EntityId, users: &[EntityId]) -> Result<(), LayerError> {
        for user in users.iter().copied() {
            if !self.entities.contains_key(&user) {
                continue;
            }
            let before = self.indexed_bounds(user);
            let after = self.reindex(user)?;
            self.notify(
                Origin::Entity(user),
                Some(EntityKind::Dimension),
                ChangeEvent::ReferenceChanged { reference },
                before,
                Some(after),
            );
        }
        Ok(())
    }
}

/// 径向标注引用圆或圆弧，其余引用都必须是点。
fn check_reference(entity: &Entity, target: &Entity, reference: EntityId) -> Result<(), LayerError> {
    let accepted = if entity.geometry().expects_point_references() {
        target.kind() == EntityKind::Point
    } else {
        matches!(target.kind(), EntityKind::Circle | EntityKind::Arc)
    };
    if accepted {
        Ok(())
    } else {
        Err(LayerError::InvalidArgument(format!(
            "a {} cannot reference {} {reference}",
            entity.kind(),
            target.kind()
        )))
    }
}

#[cfg(test)]
mod tests {
    use draftkit_core::entity::LinearOrientation;
    use draftkit_core::geometry::{Bounds2D, Point2};

    use super::*;

    fn point(layer: &mut Layer, x: f64, y: f64) -> EntityId {
        layer.add_object(Entity::point(x, y).unwrap()).unwrap()
    }

    #[test]
    fn unindexable_bounds_leave_the_index_untouched() {
        let mut layer = Layer::new("scratch");
        let p = point(&mut layer, 1.0, 1.0);
        let stray = EntityId::new(99);

        let err = layer
            .index_entity(EntityKind::Point, stray, Bounds2D::empty())
            .unwrap_err();
        assert!(matches!(err, LayerError::InvalidArgument(_)));
        let nan = Bounds2D::new(Point2::new(f64::NAN, 0.0), Point2::new(1.0, 1.0));
        assert!(layer.index_entity(EntityKind::Point, p, nan).is_err());

        assert_eq!(layer.get_layer_entities(EntityKind::Point), vec![p]);
        assert_eq!(
            layer.indices().get(EntityKind::Point).bounds_of(&p),
            Some(Bounds2D::from_coords(1.0, 1.0, 1.0, 1.0))
        );
    }

    #[test]
    fn replayed_point_delete_reindexes_dangling_dimensions() {
        let mut layer = Layer::new("dims");
        let p1 = point(&mut layer, 0.0, 0.0);
        let p2 = point(&mut layer, 10.0, 0.0);
        let dimension = layer
            .add_object(
                Entity::linear_dimension(p1, p2, LinearOrientation::Aligned, Point2::new(5.0, -3.0))
                    .unwrap(),
            )
            .unwrap();
        let indexed = |layer: &Layer| {
            layer
                .indices()
                .get(EntityKind::Dimension)
                .bounds_of(&dimension)
        };
        assert_eq!(indexed(&layer), Some(Bounds2D::from_coords(0.0, -3.0, 10.0, 0.0)));

        let removed = layer.delete_entity(p2, Replay::Undo).unwrap();
        assert!(layer.has_object(dimension));
        assert_eq!(indexed(&layer), Some(Bounds2D::from_coords(0.0, -3.0, 5.0, 0.0)));

        layer.insert_entity(removed, Replay::Redo, Some(false)).unwrap();
        assert!(layer.get_object(p2).unwrap().has_user(dimension));
        assert_eq!(indexed(&layer), Some(Bounds2D::from_coords(0.0, -3.0, 10.0, 0.0)));
    }
}
