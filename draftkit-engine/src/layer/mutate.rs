use std::collections::{HashSet, VecDeque};
use std::mem;

use draftkit_core::entity::{Entity, EntityId, EntityKind, Geometry};
use draftkit_core::errors::GeometryError;
use draftkit_core::geometry::{Point2, normalize_degrees};
use draftkit_core::style::Attributes;
use tracing::{trace, warn};

use super::{Layer, unique};
use crate::errors::LayerError;
use crate::events::{ChangeEvent, Endpoint, Origin, Signal};
use crate::undo::Replay;

/// `move_entity` 的三种平移方式。
enum Translation {
    Point(Point2),
    Relocate(Point2),
    Points(Vec<EntityId>),
}

impl Layer {
    pub fn move_point(&mut self, id: EntityId, x: f64, y: f64) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_move_point(id, x, y, Replay::None).map(drop))
    }

    /// 平移实体：点直接移动，文本和标注移动放置位置，其余实体移动它引用的每个点。
    pub fn move_entity(&mut self, id: EntityId, dx: f64, dy: f64) -> Result<(), LayerError> {
        if !dx.is_finite() || !dy.is_finite() {
            return Err(GeometryError::NonFinite { what: "offset" }.into());
        }
        self.in_action(|layer| layer.translate_entity(id, dx, dy))
    }

    pub fn set_center(&mut self, id: EntityId, center: EntityId) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_center(id, center, Replay::None).map(drop))
    }

    pub fn set_radius(&mut self, id: EntityId, radius: f64) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_radius(id, radius, Replay::None).map(drop))
    }

    pub fn set_start_angle(&mut self, id: EntityId, angle: f64) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_start_angle(id, angle, Replay::None).map(drop))
    }

    pub fn set_end_angle(&mut self, id: EntityId, angle: f64) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_end_angle(id, angle, Replay::None).map(drop))
    }

    /// 斜构造线的角度。
    pub fn set_angle(&mut self, id: EntityId, angle: f64) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_angle(id, angle, Replay::None).map(drop))
    }

    pub fn set_endpoint(
        &mut self,
        id: EntityId,
        end: Endpoint,
        point: EntityId,
    ) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_endpoint(id, end, point, Replay::None).map(drop))
    }

    /// 水平、竖直或斜构造线的定位点。
    pub fn set_location(&mut self, id: EntityId, point: EntityId) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_location(id, point, Replay::None).map(drop))
    }

    pub fn set_polyline_point(
        &mut self,
        id: EntityId,
        index: usize,
        point: EntityId,
    ) -> Result<(), LayerError> {
        self.in_action(|layer| {
            layer
                .apply_polyline_point(id, index, point, Replay::None)
                .map(drop)
        })
    }

    pub fn set_text(&mut self, id: EntityId, text: impl Into<String>) -> Result<(), LayerError> {
        let text = text.into();
        self.in_action(|layer| layer.apply_text(id, text, Replay::None).map(drop))
    }

    pub fn set_text_size(&mut self, id: EntityId, size: f64) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_text_size(id, size, Replay::None).map(drop))
    }

    pub fn set_text_location(&mut self, id: EntityId, x: f64, y: f64) -> Result<(), LayerError> {
        self.expect_kind(id, EntityKind::TextBlock, "set_text_location")?;
        self.in_action(|layer| layer.apply_relocate(id, x, y, Replay::None).map(drop))
    }

    pub fn set_dimension_location(&mut self, id: EntityId, x: f64, y: f64) -> Result<(), LayerError> {
        self.expect_kind(id, EntityKind::Dimension, "set_dimension_location")?;
        self.in_action(|layer| layer.apply_relocate(id, x, y, Replay::None).map(drop))
    }

    pub fn set_visibility(&mut self, id: EntityId, visible: bool) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_visibility(id, visible, Replay::None).map(drop))
    }

    /// 锁定状态本身总可以修改。
    pub fn set_locked(&mut self, id: EntityId, locked: bool) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_locked(id, locked, Replay::None).map(drop))
    }

    pub fn set_attributes(&mut self, id: EntityId, attributes: Attributes) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_attributes(id, attributes, Replay::None).map(drop))
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), LayerError> {
        let name = name.into();
        self.in_action(|layer| layer.apply_name(name, Replay::None).map(drop))
    }

    pub fn set_scale(&mut self, scale: f64) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_scale(scale, Replay::None).map(drop))
    }

    pub fn set_autosplit(&mut self, autosplit: bool) -> Result<(), LayerError> {
        self.in_action(|layer| layer.apply_autosplit(autosplit, Replay::None).map(drop))
    }

    pub(super) fn apply_move_point(
        &mut self,
        id: EntityId,
        x: f64,
        y: f64,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(GeometryError::NonFinite { what: "point" }.into());
        }
        self.change_entity(id, Signal::Moved, replay, false, |layer| {
            let Geometry::Point(point) = layer.geometry_mut(id)? else {
                return Err(wrong_kind(id, "move_point"));
            };
            let old = point.location();
            if old == Point2::new(x, y) {
                return Ok(None);
            }
            point.x = x;
            point.y = y;
            Ok(Some(ChangeEvent::Moved { old }))
        })
    }

    pub(super) fn apply_center(
        &mut self,
        id: EntityId,
        center: EntityId,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        self.require_point(center)?;
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let old = match layer.geometry_mut(id)? {
                Geometry::Circle(circle) => mem::replace(&mut circle.center, center),
                Geometry::Arc(arc) => mem::replace(&mut arc.center, center),
                Geometry::CCircle(circle) => mem::replace(&mut circle.center, center),
                _ => return Err(wrong_kind(id, "set_center")),
            };
            if old == center {
                return Ok(None);
            }
            layer.transfer_user(id, old, center);
            Ok(Some(ChangeEvent::CenterChanged { old }))
        })
    }

    pub(super) fn apply_radius(
        &mut self,
        id: EntityId,
        radius: f64,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(GeometryError::InvalidRadius(radius).into());
        }
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let old = match layer.geometry_mut(id)? {
                Geometry::Circle(circle) => mem::replace(&mut circle.radius, radius),
                Geometry::Arc(arc) => mem::replace(&mut arc.radius, radius),
                Geometry::CCircle(circle) => mem::replace(&mut circle.radius, radius),
                _ => return Err(wrong_kind(id, "set_radius")),
            };
            Ok((old != radius).then_some(ChangeEvent::RadiusChanged { old }))
        })
    }

    pub(super) fn apply_start_angle(
        &mut self,
        id: EntityId,
        angle: f64,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        let angle = finite_angle(angle)?;
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let Geometry::Arc(arc) = layer.geometry_mut(id)? else {
                return Err(wrong_kind(id, "set_start_angle"));
            };
            let old = mem::replace(&mut arc.start_angle, angle);
            Ok((old != angle).then_some(ChangeEvent::StartAngleChanged { old }))
        })
    }

    pub(super) fn apply_end_angle(
        &mut self,
        id: EntityId,
        angle: f64,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        let angle = finite_angle(angle)?;
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let Geometry::Arc(arc) = layer.geometry_mut(id)? else {
                return Err(wrong_kind(id, "set_end_angle"));
            };
            let old = mem::replace(&mut arc.end_angle, angle);
            Ok((old != angle).then_some(ChangeEvent::EndAngleChanged { old }))
        })
    }

    pub(super) fn apply_angle(
        &mut self,
        id: EntityId,
        angle: f64,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        let angle = finite_angle(angle)?;
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let Geometry::ACLine(line) = layer.geometry_mut(id)? else {
                return Err(wrong_kind(id, "set_angle"));
            };
            let old = mem::replace(&mut line.angle, angle);
            Ok((old != angle).then_some(ChangeEvent::AngleChanged { old }))
        })
    }

    pub(super) fn apply_endpoint(
        &mut self,
        id: EntityId,
        end: Endpoint,
        point: EntityId,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        self.require_point(point)?;
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let (p1, p2) = match layer.geometry_mut(id)? {
                Geometry::Segment(segment) => (&mut segment.p1, &mut segment.p2),
                Geometry::CLine(line) => (&mut line.p1, &mut line.p2),
                _ => return Err(wrong_kind(id, "set_endpoint")),
            };
            let (slot, other) = match end {
                Endpoint::First => (p1, *p2),
                Endpoint::Second => (p2, *p1),
            };
            if other == point {
                return Err(GeometryError::DegenerateLine.into());
            }
            let old = mem::replace(slot, point);
            if old == point {
                return Ok(None);
            }
            layer.transfer_user(id, old, point);
            Ok(Some(ChangeEvent::EndpointChanged { end, old }))
        })
    }

    pub(super) fn apply_location(
        &mut self,
        id: EntityId,
        point: EntityId,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        self.require_point(point)?;
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let old = match layer.geometry_mut(id)? {
                Geometry::HCLine(line) => mem::replace(&mut line.location, point),
                Geometry::VCLine(line) => mem::replace(&mut line.location, point),
                Geometry::ACLine(line) => mem::replace(&mut line.location, point),
                _ => return Err(wrong_kind(id, "set_location")),
            };
            if old == point {
                return Ok(None);
            }
            layer.transfer_user(id, old, point);
            Ok(Some(ChangeEvent::LocationChanged { old }))
        })
    }

    pub(super) fn apply_polyline_point(
        &mut self,
        id: EntityId,
        index: usize,
        point: EntityId,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        self.require_point(point)?;
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let Geometry::Polyline(polyline) = layer.geometry_mut(id)? else {
                return Err(wrong_kind(id, "set_polyline_point"));
            };
            let count = polyline.points.len();
            let slot = polyline.points.get_mut(index).ok_or_else(|| {
                LayerError::InvalidArgument(format!(
                    "polyline {id} has {count} points, index {index} is out of range"
                ))
            })?;
            let old = mem::replace(slot, point);
            if old == point {
                return Ok(None);
            }
            layer.transfer_user(id, old, point);
            Ok(Some(ChangeEvent::PolylinePointChanged { index, old }))
        })
    }

    pub(super) fn apply_text(
        &mut self,
        id: EntityId,
        text: String,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let Geometry::TextBlock(block) = layer.geometry_mut(id)? else {
                return Err(wrong_kind(id, "set_text"));
            };
            if block.text == text {
                return Ok(None);
            }
            let old = mem::replace(&mut block.text, text);
            Ok(Some(ChangeEvent::TextChanged { old }))
        })
    }

    pub(super) fn apply_text_size(
        &mut self,
        id: EntityId,
        size: f64,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        if !size.is_finite() || size <= 0.0 {
            return Err(GeometryError::InvalidTextSize(size).into());
        }
        self.change_entity(id, Signal::Modified, replay, false, |layer| {
            let Geometry::TextBlock(block) = layer.geometry_mut(id)? else {
                return Err(wrong_kind(id, "set_text_size"));
            };
            let old = mem::replace(&mut block.size, size);
            Ok((old != size).then_some(ChangeEvent::TextSizeChanged { old }))
        })
    }

    /// 文本或标注的放置位置。
    pub(super) fn apply_relocate(
        &mut self,
        id: EntityId,
        x: f64,
        y: f64,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        let location = Point2::new(x, y);
        if !location.is_finite() {
            return Err(GeometryError::NonFinite { what: "location" }.into());
        }
        self.change_entity(id, Signal::Moved, replay, false, |layer| {
            let old = match layer.geometry_mut(id)? {
                Geometry::TextBlock(block) => mem::replace(&mut block.location, location),
                Geometry::Dimension(dimension) => mem::replace(&mut dimension.location, location),
                _ => return Err(wrong_kind(id, "relocate")),
            };
            Ok((old != location).then_some(ChangeEvent::Relocated { old }))
        })
    }

    pub(super) fn apply_visibility(
        &mut self,
        id: EntityId,
        visible: bool,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        self.change_entity(id, Signal::Visibility, replay, false, |layer| {
            let entity = layer.entity_mut(id)?;
            let old = entity.is_visible();
            if old == visible {
                return Ok(None);
            }
            entity.set_visible(visible);
            Ok(Some(ChangeEvent::VisibilityChanged { old }))
        })
    }

    pub(super) fn apply_locked(
        &mut self,
        id: EntityId,
        locked: bool,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        self.change_entity(id, Signal::Lock, replay, true, |layer| {
            let entity = layer.entity_mut(id)?;
            let old = entity.is_locked();
            if old == locked {
                return Ok(None);
            }
            entity.set_locked(locked);
            Ok(Some(ChangeEvent::LockChanged { old }))
        })
    }

    pub(super) fn apply_attributes(
        &mut self,
        id: EntityId,
        attributes: Attributes,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        self.change_entity(id, Signal::Attributes, replay, false, |layer| {
            let entity = layer.entity_mut(id)?;
            if *entity.attributes() == attributes {
                return Ok(None);
            }
            let old = entity.replace_attributes(attributes)?;
            Ok(Some(ChangeEvent::AttributesChanged { old }))
        })
    }

    pub(super) fn apply_name(
        &mut self,
        name: String,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        if name == self.name {
            return Ok(None);
        }
        let old = mem::replace(&mut self.name, name);
        self.change_layer(ChangeEvent::NameChanged { old }, replay)
    }

    pub(super) fn apply_scale(
        &mut self,
        scale: f64,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(GeometryError::InvalidScale(scale).into());
        }
        if scale == self.scale {
            return Ok(None);
        }
        let old = mem::replace(&mut self.scale, scale);
        self.change_layer(ChangeEvent::ScaleChanged { old }, replay)
    }

    pub(super) fn apply_autosplit(
        &mut self,
        autosplit: bool,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        if autosplit == self.settings.autosplit {
            return Ok(None);
        }
        let old = mem::replace(&mut self.settings.autosplit, autosplit);
        self.change_layer(ChangeEvent::AutosplitChanged { old }, replay)
    }

    /// 修改一个实体的公共流程：锁定检查、通知括号、重新索引、记录日志、刷新使用者。
    ///
    /// `apply` 就地修改实体并返回携带旧值的事件，值未变化时返回 `None`。
    fn change_entity<F>(
        &mut self,
        id: EntityId,
        signal: Signal,
        replay: Replay,
        lock_exempt: bool,
        apply: F,
    ) -> Result<Option<ChangeEvent>, LayerError>
    where
        F: FnOnce(&mut Self) -> Result<Option<ChangeEvent>, LayerError>,
    {
        let entity = self.entities.get(&id).ok_or(LayerError::NotMember(id))?;
        if entity.is_locked() && !lock_exempt && !replay.is_replaying() {
            warn!(layer = %self.id, id = %id, ?signal, "change refused, entity is locked");
            return Err(LayerError::Locked(id));
        }
        let kind = entity.kind();
        let origin = Origin::Entity(id);
        let before = self.indexed_bounds(id);

        self.bus.start_change(origin, signal);
        let result = apply(self).and_then(|event| {
            let Some(event) = event else {
                return Ok(None);
            };
            let after = self.reindex(id)?;
            self.record(origin, event.clone(), replay)?;
            self.notify(origin, Some(kind), event.clone(), before, Some(after));
            self.refresh_users(id)?;
            Ok(Some(event))
        });
        self.bus.end_change(origin, signal);
        result
    }

    fn change_layer(
        &mut self,
        event: ChangeEvent,
        replay: Replay,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        let signal = event.signal();
        self.bus.start_change(Origin::Layer, signal);
        let recorded = self.record(Origin::Layer, event.clone(), replay);
        self.notify(Origin::Layer, None, event.clone(), None, None);
        self.bus.end_change(Origin::Layer, signal);
        recorded?;
        Ok(Some(event))
    }

    /// 被引用实体变化后重新索引全部直接和间接使用者（如圆上的径向标注）。
    pub(super) fn refresh_users(&mut self, id: EntityId) -> Result<(), LayerError> {
        let mut queue = VecDeque::from([id]);
        let mut seen = HashSet::from([id]);
        while let Some(reference) = queue.pop_front() {
            let users: Vec<EntityId> = match self.entities.get(&reference) {
                Some(entity) => entity.users().collect(),
                None => continue,
            };
            for user in users {
                if !seen.insert(user) {
                    continue;
                }
                let before = self.indexed_bounds(user);
                let after = self.reindex(user)?;
                let kind = self.kind_of(user);
                self.notify(
                    Origin::Entity(user),
                    kind,
                    ChangeEvent::ReferenceChanged { reference },
                    before,
                    Some(after),
                );
                queue.push_back(user);
            }
        }
        Ok(())
    }

    fn translate_entity(&mut self, id: EntityId, dx: f64, dy: f64) -> Result<(), LayerError> {
        let entity = self.entities.get(&id).ok_or(LayerError::NotMember(id))?;
        if entity.is_locked() {
            warn!(layer = %self.id, id = %id, "move refused, entity is locked");
            return Err(LayerError::Locked(id));
        }
        let kind = entity.kind();
        let translation = match entity.geometry() {
            Geometry::Point(point) => Translation::Point(point.location()),
            Geometry::TextBlock(block) => Translation::Relocate(block.location),
            Geometry::Dimension(dimension) => Translation::Relocate(dimension.location),
            geometry => Translation::Points(unique(geometry.references())),
        };

        match translation {
            Translation::Point(at) => {
                self.apply_move_point(id, at.x() + dx, at.y() + dy, Replay::None)?;
            }
            Translation::Relocate(at) => {
                self.apply_relocate(id, at.x() + dx, at.y() + dy, Replay::None)?;
            }
            Translation::Points(points) => {
                let locked = points
                    .iter()
                    .copied()
                    .find(|point| self.entities.get(point).is_some_and(Entity::is_locked));
                if let Some(locked) = locked {
                    warn!(
                        layer = %self.id,
                        id = %id,
                        point = %locked,
                        "move refused, a referenced point is locked"
                    );
                    return Err(LayerError::Locked(locked));
                }
                let origin = Origin::Entity(id);
                let before = self.indexed_bounds(id);
                self.bus.start_change(origin, Signal::Moved);
                self.bus.ignore(origin, Signal::Moved);
                let mut result = Ok(());
                for point in points {
                    let Some(at) = self.point_location(point) else {
                        continue;
                    };
                    if let Err(err) =
                        self.apply_move_point(point, at.x() + dx, at.y() + dy, Replay::None)
                    {
                        result = Err(err);
                        break;
                    }
                }
                self.bus.receive(origin, Signal::Moved);
                if result.is_ok() {
                    let after = self.indexed_bounds(id);
                    self.notify(
                        origin,
                        Some(kind),
                        ChangeEvent::Translated { dx, dy },
                        before,
                        after,
                    );
                    trace!(layer = %self.id, id = %id, dx, dy, "entity translated");
                }
                self.bus.end_change(origin, Signal::Moved);
                result?;
            }
        }
        Ok(())
    }

    /// 引用从 `old` 换到 `new`：实体不再引用 `old` 时才注销使用者。
    fn transfer_user(&mut self, user: EntityId, old: EntityId, new: EntityId) {
        let still_used = self
            .entities
            .get(&user)
            .is_some_and(|entity| entity.geometry().references().contains(&old));
        if !still_used {
            if let Some(target) = self.entities.get_mut(&old) {
                target.free_user(user);
            }
        }
        if let Some(target) = self.entities.get_mut(&new) {
            target.store_user(user);
        }
    }

    fn require_point(&self, id: EntityId) -> Result<(), LayerError> {
        match self.kind_of(id) {
            Some(EntityKind::Point) => Ok(()),
            Some(kind) => Err(LayerError::InvalidArgument(format!(
                "{kind} {id} is not a point"
            ))),
            None => Err(LayerError::MissingReference { missing: id }),
        }
    }

    fn expect_kind(&self, id: EntityId, kind: EntityKind, operation: &str) -> Result<(), LayerError> {
        match self.kind_of(id) {
            Some(found) if found == kind => Ok(()),
            Some(_) => Err(wrong_kind(id, operation)),
            None => Err(LayerError::NotMember(id)),
        }
    }

    fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, LayerError> {
        self.entities.get_mut(&id).ok_or(LayerError::NotMember(id))
    }

    fn geometry_mut(&mut self, id: EntityId) -> Result<&mut Geometry, LayerError> {
        Ok(self.entity_mut(id)?.geometry_mut())
    }
}

fn wrong_kind(id: EntityId, operation: &str) -> LayerError {
    LayerError::InvalidArgument(format!("{operation} does not apply to entity {id}"))
}

fn finite_angle(angle: f64) -> Result<f64, LayerError> {
    if angle.is_finite() {
        Ok(normalize_degrees(angle))
    } else {
        Err(GeometryError::NonFinite { what: "angle" }.into())
    }
}
