//! 实体记录。
//!
//! 几何负载只保存被引用实体的 `EntityId`，坐标由图层通过 [`Resolver`] 解析；
//! `users` 记录哪些实体引用了本实体，图层据此维护引用完整性。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::GeometryError;
use crate::geometry::{Point2, normalize_degrees};
use crate::shape::{Shape, text_bounds};
use crate::style::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 实体类别，每一类在图层中有独立的空间索引。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "point")]
    Point,
    #[serde(rename = "segment")]
    Segment,
    #[serde(rename = "circle")]
    Circle,
    #[serde(rename = "arc")]
    Arc,
    #[serde(rename = "hcline")]
    HCLine,
    #[serde(rename = "vcline")]
    VCLine,
    #[serde(rename = "acline")]
    ACLine,
    #[serde(rename = "cline")]
    CLine,
    #[serde(rename = "ccircle")]
    CCircle,
    #[serde(rename = "polyline")]
    Polyline,
    #[serde(rename = "text")]
    TextBlock,
    #[serde(rename = "dimension")]
    Dimension,
}

impl EntityKind {
    pub const ALL: [EntityKind; 12] = [
        EntityKind::Point,
        EntityKind::Segment,
        EntityKind::Circle,
        EntityKind::Arc,
        EntityKind::HCLine,
        EntityKind::VCLine,
        EntityKind::ACLine,
        EntityKind::CLine,
        EntityKind::CCircle,
        EntityKind::Polyline,
        EntityKind::TextBlock,
        EntityKind::Dimension,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Point => "point",
            EntityKind::Segment => "segment",
            EntityKind::Circle => "circle",
            EntityKind::Arc => "arc",
            EntityKind::HCLine => "hcline",
            EntityKind::VCLine => "vcline",
            EntityKind::ACLine => "acline",
            EntityKind::CLine => "cline",
            EntityKind::CCircle => "ccircle",
            EntityKind::Polyline => "polyline",
            EntityKind::TextBlock => "text",
            EntityKind::Dimension => "dimension",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub fn location(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub p1: EntityId,
    pub p2: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: EntityId,
    pub radius: f64,
}

/// 起止角相同表示整圆弧。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    pub center: EntityId,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HCLine {
    pub location: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VCLine {
    pub location: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ACLine {
    pub location: EntityId,
    pub angle: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CLine {
    pub p1: EntityId,
    pub p2: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CCircle {
    pub center: EntityId,
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub points: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub location: Point2,
    pub text: String,
    pub size: f64,
    pub angle: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearOrientation {
    Aligned,
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Linear {
        p1: EntityId,
        p2: EntityId,
        orientation: LinearOrientation,
    },
    /// `circle` 指向圆或圆弧实体。
    Radial { circle: EntityId, diameter: bool },
    Angular {
        vertex: EntityId,
        p1: EntityId,
        p2: EntityId,
    },
}

/// 标注只记录锚点与文字位置，文字格式与排版不在本库范围内。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub kind: DimensionKind,
    pub location: Point2,
}

/// 把被引用实体的 id 解析为坐标。
pub trait Resolver {
    fn point(&self, id: EntityId) -> Option<Point2>;
    /// 圆或圆弧实体的圆心与半径。
    fn circle(&self, id: EntityId) -> Option<(Point2, f64)>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point(Point),
    Segment(Segment),
    Circle(Circle),
    Arc(Arc),
    #[serde(rename = "hcline")]
    HCLine(HCLine),
    #[serde(rename = "vcline")]
    VCLine(VCLine),
    #[serde(rename = "acline")]
    ACLine(ACLine),
    #[serde(rename = "cline")]
    CLine(CLine),
    #[serde(rename = "ccircle")]
    CCircle(CCircle),
    Polyline(Polyline),
    #[serde(rename = "text")]
    TextBlock(TextBlock),
    Dimension(Dimension),
}

impl Geometry {
    pub fn kind(&self) -> EntityKind {
        match self {
            Geometry::Point(_) => EntityKind::Point,
            Geometry::Segment(_) => EntityKind::Segment,
            Geometry::Circle(_) => EntityKind::Circle,
            Geometry::Arc(_) => EntityKind::Arc,
            Geometry::HCLine(_) => EntityKind::HCLine,
            Geometry::VCLine(_) => EntityKind::VCLine,
            Geometry::ACLine(_) => EntityKind::ACLine,
            Geometry::CLine(_) => EntityKind::CLine,
            Geometry::CCircle(_) => EntityKind::CCircle,
            Geometry::Polyline(_) => EntityKind::Polyline,
            Geometry::TextBlock(_) => EntityKind::TextBlock,
            Geometry::Dimension(_) => EntityKind::Dimension,
        }
    }

    /// 引用的所有实体 id，按定义顺序，可能重复（闭合多段线）。
    pub fn references(&self) -> Vec<EntityId> {
        match self {
            Geometry::Point(_) | Geometry::TextBlock(_) => Vec::new(),
            Geometry::Segment(s) => vec![s.p1, s.p2],
            Geometry::CLine(c) => vec![c.p1, c.p2],
            Geometry::Circle(c) => vec![c.center],
            Geometry::CCircle(c) => vec![c.center],
            Geometry::Arc(a) => vec![a.center],
            Geometry::HCLine(h) => vec![h.location],
            Geometry::VCLine(v) => vec![v.location],
            Geometry::ACLine(a) => vec![a.location],
            Geometry::Polyline(p) => p.points.clone(),
            Geometry::Dimension(d) => match d.kind {
                DimensionKind::Linear { p1, p2, .. } => vec![p1, p2],
                DimensionKind::Radial { circle, .. } => vec![circle],
                DimensionKind::Angular { vertex, p1, p2 } => vec![vertex, p1, p2],
            },
        }
    }

    /// 引用是否必须指向点实体；径向标注引用的是圆或圆弧。
    pub fn expects_point_references(&self) -> bool {
        !matches!(
            self,
            Geometry::Dimension(Dimension {
                kind: DimensionKind::Radial { .. },
                ..
            })
        )
    }

    /// 检查与坐标无关的参数。
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Geometry::Point(p) => {
                finite(p.x, "point x")?;
                finite(p.y, "point y")
            }
            Geometry::Segment(s) if s.p1 == s.p2 => Err(GeometryError::DegenerateLine),
            Geometry::CLine(c) if c.p1 == c.p2 => Err(GeometryError::DegenerateLine),
            Geometry::Segment(_) | Geometry::CLine(_) => Ok(()),
            Geometry::Circle(Circle { radius, .. }) | Geometry::CCircle(CCircle { radius, .. }) => {
                positive_radius(*radius)
            }
            Geometry::Arc(a) => {
                positive_radius(a.radius)?;
                finite(a.start_angle, "start angle")?;
                finite(a.end_angle, "end angle")
            }
            Geometry::HCLine(_) | Geometry::VCLine(_) => Ok(()),
            Geometry::ACLine(a) => finite(a.angle, "angle"),
            Geometry::Polyline(p) if p.points.len() < 2 => {
                Err(GeometryError::TooFewPoints(p.points.len()))
            }
            Geometry::Polyline(_) => Ok(()),
            Geometry::TextBlock(t) => {
                if !t.location.is_finite() {
                    return Err(GeometryError::NonFinite {
                        what: "text location",
                    });
                }
                finite(t.angle, "text angle")?;
                if !t.size.is_finite() || t.size <= 0.0 {
                    return Err(GeometryError::InvalidTextSize(t.size));
                }
                Ok(())
            }
            Geometry::Dimension(d) => {
                if d.location.is_finite() {
                    Ok(())
                } else {
                    Err(GeometryError::NonFinite {
                        what: "dimension location",
                    })
                }
            }
        }
    }

    /// 解析为坐标形状；缺少必需的点时返回 `None`。标注会跳过缺失的锚点。
    pub fn resolve<R: Resolver + ?Sized>(&self, resolver: &R) -> Option<Shape> {
        let shape = match self {
            Geometry::Point(p) => Shape::Point(p.location()),
            Geometry::Segment(s) => Shape::Segment {
                p1: resolver.point(s.p1)?,
                p2: resolver.point(s.p2)?,
            },
            Geometry::Circle(c) => Shape::Circle {
                center: resolver.point(c.center)?,
                radius: c.radius,
            },
            Geometry::Arc(a) => Shape::Arc {
                center: resolver.point(a.center)?,
                radius: a.radius,
                start_angle: a.start_angle,
                end_angle: a.end_angle,
            },
            Geometry::HCLine(h) => Shape::HCLine {
                location: resolver.point(h.location)?,
            },
            Geometry::VCLine(v) => Shape::VCLine {
                location: resolver.point(v.location)?,
            },
            Geometry::ACLine(a) => Shape::ACLine {
                location: resolver.point(a.location)?,
                angle: a.angle,
            },
            Geometry::CLine(c) => Shape::CLine {
                p1: resolver.point(c.p1)?,
                p2: resolver.point(c.p2)?,
            },
            Geometry::CCircle(c) => Shape::CCircle {
                center: resolver.point(c.center)?,
                radius: c.radius,
            },
            Geometry::Polyline(p) => Shape::Polyline {
                points: p
                    .points
                    .iter()
                    .map(|id| resolver.point(*id))
                    .collect::<Option<Vec<_>>>()?,
            },
            Geometry::TextBlock(t) => Shape::Text {
                bounds: text_bounds(t.location, &t.text, t.size, t.angle),
            },
            Geometry::Dimension(d) => {
                let anchors = match d.kind {
                    DimensionKind::Radial { circle, .. } => resolver
                        .circle(circle)
                        .map(|(center, radius)| {
                            vec![
                                Point2::new(center.x() - radius, center.y() - radius),
                                Point2::new(center.x() + radius, center.y() + radius),
                            ]
                        })
                        .unwrap_or_default(),
                    _ => self
                        .references()
                        .into_iter()
                        .filter_map(|id| resolver.point(id))
                        .collect(),
                };
                Shape::Dimension {
                    anchors,
                    location: d.location,
                }
            }
        };
        Some(shape)
    }
}

fn finite(value: f64, what: &'static str) -> Result<(), GeometryError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(GeometryError::NonFinite { what })
    }
}

fn positive_radius(radius: f64) -> Result<(), GeometryError> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(GeometryError::InvalidRadius(radius))
    }
}

/// 图层中的一个实体。
///
/// 相等比较忽略 `users`：使用者集合由图层维护，不属于实体自身的值。
#[derive(Debug, Clone)]
pub struct Entity {
    id: Option<EntityId>,
    geometry: Geometry,
    attributes: Attributes,
    visible: bool,
    locked: bool,
    users: BTreeSet<EntityId>,
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.geometry == other.geometry
            && self.attributes == other.attributes
            && self.visible == other.visible
            && self.locked == other.locked
    }
}

impl Entity {
    pub fn new(geometry: Geometry) -> Result<Self, GeometryError> {
        geometry.validate()?;
        Ok(Self {
            id: None,
            geometry,
            attributes: Attributes::default(),
            visible: true,
            locked: false,
            users: BTreeSet::new(),
        })
    }

    pub fn point(x: f64, y: f64) -> Result<Self, GeometryError> {
        Self::new(Geometry::Point(Point { x, y }))
    }

    pub fn segment(p1: EntityId, p2: EntityId) -> Result<Self, GeometryError> {
        Self::new(Geometry::Segment(Segment { p1, p2 }))
    }

    pub fn circle(center: EntityId, radius: f64) -> Result<Self, GeometryError> {
        Self::new(Geometry::Circle(Circle { center, radius }))
    }

    pub fn arc(
        center: EntityId,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    ) -> Result<Self, GeometryError> {
        finite(start_angle, "start angle")?;
        finite(end_angle, "end angle")?;
        Self::new(Geometry::Arc(Arc {
            center,
            radius,
            start_angle: normalize_degrees(start_angle),
            end_angle: normalize_degrees(end_angle),
        }))
    }

    pub fn hcline(location: EntityId) -> Result<Self, GeometryError> {
        Self::new(Geometry::HCLine(HCLine { location }))
    }

    pub fn vcline(location: EntityId) -> Result<Self, GeometryError> {
        Self::new(Geometry::VCLine(VCLine { location }))
    }

    pub fn acline(location: EntityId, angle: f64) -> Result<Self, GeometryError> {
        finite(angle, "angle")?;
        Self::new(Geometry::ACLine(ACLine {
            location,
            angle: normalize_degrees(angle),
        }))
    }

    pub fn cline(p1: EntityId, p2: EntityId) -> Result<Self, GeometryError> {
        Self::new(Geometry::CLine(CLine { p1, p2 }))
    }

    pub fn ccircle(center: EntityId, radius: f64) -> Result<Self, GeometryError> {
        Self::new(Geometry::CCircle(CCircle { center, radius }))
    }

    pub fn polyline(points: Vec<EntityId>) -> Result<Self, GeometryError> {
        Self::new(Geometry::Polyline(Polyline { points }))
    }

    pub fn text(
        x: f64,
        y: f64,
        text: impl Into<String>,
        size: f64,
        angle: f64,
    ) -> Result<Self, GeometryError> {
        Self::new(Geometry::TextBlock(TextBlock {
            location: Point2::new(x, y),
            text: text.into(),
            size,
            angle,
        }))
    }

    pub fn linear_dimension(
        p1: EntityId,
        p2: EntityId,
        orientation: LinearOrientation,
        location: Point2,
    ) -> Result<Self, GeometryError> {
        Self::new(Geometry::Dimension(Dimension {
            kind: DimensionKind::Linear { p1, p2, orientation },
            location,
        }))
    }

    pub fn radial_dimension(
        circle: EntityId,
        diameter: bool,
        location: Point2,
    ) -> Result<Self, GeometryError> {
        Self::new(Geometry::Dimension(Dimension {
            kind: DimensionKind::Radial { circle, diameter },
            location,
        }))
    }

    pub fn angular_dimension(
        vertex: EntityId,
        p1: EntityId,
        p2: EntityId,
        location: Point2,
    ) -> Result<Self, GeometryError> {
        Self::new(Geometry::Dimension(Dimension {
            kind: DimensionKind::Angular { vertex, p1, p2 },
            location,
        }))
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Result<Self, GeometryError> {
        attributes.validate()?;
        self.attributes = attributes;
        Ok(self)
    }

    /// 图层在加入实体时分配 id；已有 id 的实体保持不变。
    pub fn assign_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    #[inline]
    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> EntityKind {
        self.geometry.kind()
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// 直接修改几何负载。调用方负责重新索引和通知。
    #[inline]
    pub fn geometry_mut(&mut self) -> &mut Geometry {
        &mut self.geometry
    }

    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// 替换显示属性并返回旧值。
    pub fn replace_attributes(&mut self, attributes: Attributes) -> Result<Attributes, GeometryError> {
        attributes.validate()?;
        Ok(std::mem::replace(&mut self.attributes, attributes))
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    #[inline]
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[inline]
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// 登记一个使用者，重复登记返回 `false`。
    pub fn store_user(&mut self, user: EntityId) -> bool {
        self.users.insert(user)
    }

    /// 注销一个使用者，未登记过返回 `false`。
    pub fn free_user(&mut self, user: EntityId) -> bool {
        self.users.remove(&user)
    }

    pub fn users(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.users.iter().copied()
    }

    #[inline]
    pub fn count_users(&self) -> usize {
        self.users.len()
    }

    #[inline]
    pub fn has_users(&self) -> bool {
        !self.users.is_empty()
    }

    pub fn has_user(&self, user: EntityId) -> bool {
        self.users.contains(&user)
    }

    pub fn clear_users(&mut self) {
        self.users.clear();
    }

    /// 点实体的坐标。
    pub fn location(&self) -> Option<Point2> {
        match &self.geometry {
            Geometry::Point(p) => Some(p.location()),
            _ => None,
        }
    }

    /// 圆或圆弧实体的圆心 id 与半径。
    pub fn circle_parameters(&self) -> Option<(EntityId, f64)> {
        match &self.geometry {
            Geometry::Circle(c) => Some((c.center, c.radius)),
            Geometry::Arc(a) => Some((a.center, a.radius)),
            _ => None,
        }
    }
}
