//! 变更事件。
//!
//! 每个事件携带变更前的值，撤销日志直接保存事件本身，回放时据此恢复。

use std::fmt;

use draftkit_core::entity::{Entity, EntityId, EntityKind};
use draftkit_core::geometry::{Bounds2D, Point2};
use draftkit_core::style::Attributes;

use crate::layer::LayerId;

/// 通知的粗粒度分类，订阅按它过滤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    Moved,
    Modified,
    Attributes,
    Visibility,
    Lock,
    Added,
    Removed,
    Properties,
    Sublayers,
}

/// 线段或构造线的两个端点。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    First,
    Second,
}

/// 事件来源：图层结构本身，或图层中的某个实体。同时用作撤销日志的键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    Layer,
    Entity(EntityId),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Layer => f.write_str("layer"),
            Origin::Entity(id) => write!(f, "entity {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// 点坐标改变。
    Moved { old: Point2 },
    /// 被引用的实体（点、圆）变化后，使用者收到的派生通知。
    ReferenceChanged { reference: EntityId },
    /// `move_entity` 完成后对被平移实体的汇总通知。
    Translated { dx: f64, dy: f64 },
    CenterChanged { old: EntityId },
    RadiusChanged { old: f64 },
    StartAngleChanged { old: f64 },
    EndAngleChanged { old: f64 },
    AngleChanged { old: f64 },
    EndpointChanged { end: Endpoint, old: EntityId },
    /// 构造线的定位点改变。
    LocationChanged { old: EntityId },
    PolylinePointChanged { index: usize, old: EntityId },
    TextChanged { old: String },
    TextSizeChanged { old: f64 },
    /// 文本或标注的放置位置改变。
    Relocated { old: Point2 },
    VisibilityChanged { old: bool },
    LockChanged { old: bool },
    AttributesChanged { old: Attributes },
    ChildAdded { id: EntityId },
    /// 被删除实体的完整快照（含被引用实体的 id）。
    ChildRemoved { entity: Box<Entity> },
    NameChanged { old: String },
    ScaleChanged { old: f64 },
    AutosplitChanged { old: bool },
    SublayerAdded { id: LayerId },
    SublayerRemoved { id: LayerId },
}

impl ChangeEvent {
    pub fn signal(&self) -> Signal {
        match self {
            ChangeEvent::Moved { .. }
            | ChangeEvent::ReferenceChanged { .. }
            | ChangeEvent::Translated { .. }
            | ChangeEvent::Relocated { .. } => Signal::Moved,
            ChangeEvent::CenterChanged { .. }
            | ChangeEvent::RadiusChanged { .. }
            | ChangeEvent::StartAngleChanged { .. }
            | ChangeEvent::EndAngleChanged { .. }
            | ChangeEvent::AngleChanged { .. }
            | ChangeEvent::EndpointChanged { .. }
            | ChangeEvent::LocationChanged { .. }
            | ChangeEvent::PolylinePointChanged { .. }
            | ChangeEvent::TextChanged { .. }
            | ChangeEvent::TextSizeChanged { .. } => Signal::Modified,
            ChangeEvent::VisibilityChanged { .. } => Signal::Visibility,
            ChangeEvent::LockChanged { .. } => Signal::Lock,
            ChangeEvent::AttributesChanged { .. } => Signal::Attributes,
            ChangeEvent::ChildAdded { .. } => Signal::Added,
            ChangeEvent::ChildRemoved { .. } => Signal::Removed,
            ChangeEvent::NameChanged { .. }
            | ChangeEvent::ScaleChanged { .. }
            | ChangeEvent::AutosplitChanged { .. } => Signal::Properties,
            ChangeEvent::SublayerAdded { .. } | ChangeEvent::SublayerRemoved { .. } => {
                Signal::Sublayers
            }
        }
    }

    /// 是否写入撤销日志。派生通知与子图层增删不记录。
    pub fn is_logged(&self) -> bool {
        !matches!(
            self,
            ChangeEvent::ReferenceChanged { .. }
                | ChangeEvent::Translated { .. }
                | ChangeEvent::SublayerAdded { .. }
                | ChangeEvent::SublayerRemoved { .. }
        )
    }
}

/// 发给监听者的一条通知。
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub layer: LayerId,
    pub origin: Origin,
    pub kind: Option<EntityKind>,
    pub event: ChangeEvent,
    /// 变更前后的包围盒，供重绘使用。
    pub before: Option<Bounds2D>,
    pub after: Option<Bounds2D>,
}

impl Notice {
    #[inline]
    pub fn signal(&self) -> Signal {
        self.event.signal()
    }
}
