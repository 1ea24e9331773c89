use tracing::trace;

use super::Layer;
use crate::errors::LayerError;
use crate::events::{ChangeEvent, Origin};
use crate::undo::Replay;

impl Layer {
    /// 回放一条日志条目，返回应压入反方向栈的逆事件。
    ///
    /// 回放经由与正常编辑相同的修改路径，但 `replay` 上下文会跳过日志记录、
    /// 锁定检查、自动分割和无用点清理。任何失败都包装为 [`LayerError::Replay`]。
    pub(super) fn execute(
        &mut self,
        replay: Replay,
        origin: Origin,
        event: ChangeEvent,
    ) -> Result<ChangeEvent, LayerError> {
        trace!(layer = %self.id, %origin, ?replay, ?event, "replaying");
        match self.replay_event(replay, origin, event.clone()) {
            Ok(Some(inverse)) => Ok(inverse),
            // 值已经是目标状态，逆事件就是原事件本身。
            Ok(None) => Ok(event),
            Err(source) => Err(LayerError::Replay {
                origin,
                source: Box::new(source),
            }),
        }
    }

    fn replay_event(
        &mut self,
        replay: Replay,
        origin: Origin,
        event: ChangeEvent,
    ) -> Result<Option<ChangeEvent>, LayerError> {
        match (origin, event) {
            (Origin::Layer, ChangeEvent::ChildAdded { id }) => {
                let entity = self.delete_entity(id, replay)?;
                Ok(Some(ChangeEvent::ChildRemoved {
                    entity: Box::new(entity),
                }))
            }
            (Origin::Layer, ChangeEvent::ChildRemoved { entity }) => {
                let id = self.insert_entity(*entity, replay, Some(false))?;
                Ok(Some(ChangeEvent::ChildAdded { id }))
            }
            (Origin::Layer, ChangeEvent::NameChanged { old }) => self.apply_name(old, replay),
            (Origin::Layer, ChangeEvent::ScaleChanged { old }) => self.apply_scale(old, replay),
            (Origin::Layer, ChangeEvent::AutosplitChanged { old }) => {
                self.apply_autosplit(old, replay)
            }
            (Origin::Entity(id), ChangeEvent::Moved { old }) => {
                self.apply_move_point(id, old.x(), old.y(), replay)
            }
            (Origin::Entity(id), ChangeEvent::CenterChanged { old }) => {
                self.apply_center(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::RadiusChanged { old }) => {
                self.apply_radius(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::StartAngleChanged { old }) => {
                self.apply_start_angle(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::EndAngleChanged { old }) => {
                self.apply_end_angle(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::AngleChanged { old }) => {
                self.apply_angle(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::EndpointChanged { end, old }) => {
                self.apply_endpoint(id, end, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::LocationChanged { old }) => {
                self.apply_location(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::PolylinePointChanged { index, old }) => {
                self.apply_polyline_point(id, index, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::TextChanged { old }) => {
                self.apply_text(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::TextSizeChanged { old }) => {
                self.apply_text_size(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::Relocated { old }) => {
                self.apply_relocate(id, old.x(), old.y(), replay)
            }
            (Origin::Entity(id), ChangeEvent::VisibilityChanged { old }) => {
                self.apply_visibility(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::LockChanged { old }) => {
                self.apply_locked(id, old, replay)
            }
            (Origin::Entity(id), ChangeEvent::AttributesChanged { old }) => {
                self.apply_attributes(id, old, replay)
            }
            (origin, event) => Err(LayerError::InvalidArgument(format!(
                "{event:?} cannot be replayed on {origin}"
            ))),
        }
    }
}
