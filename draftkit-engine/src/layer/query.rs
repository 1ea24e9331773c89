use std::cmp::Ordering;

use draftkit_core::entity::{Entity, EntityId, EntityKind, Geometry};
use draftkit_core::geometry::{Bounds2D, EPSILON, Point2, normalize_degrees};
use draftkit_core::shape::Shape;

use super::Layer;

/// 按坐标精确查找已有几何，用于避免重复创建。坐标比较的容差为 [`EPSILON`]。
#[derive(Debug, Clone, PartialEq)]
pub enum FindQuery {
    /// 距 `(x, y)` 不超过 `tolerance` 的点。
    Point { x: f64, y: f64, tolerance: f64 },
    /// 端点顺序不限。
    Segment { x1: f64, y1: f64, x2: f64, y2: f64 },
    Circle { x: f64, y: f64, radius: f64 },
    Arc {
        x: f64,
        y: f64,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    HCLine { y: f64 },
    VCLine { x: f64 },
    /// 经过 `(x, y)`、方向为 `angle` 的斜构造线，角度按 180° 取模比较。
    ACLine { x: f64, y: f64, angle: f64 },
    /// 同时经过两个给定点的构造线。
    CLine { x1: f64, y1: f64, x2: f64, y2: f64 },
    CCircle { x: f64, y: f64, radius: f64 },
    /// 顶点坐标依次相同的多段线。
    Polyline { points: Vec<Point2> },
    Text { x: f64, y: f64, text: String },
}

impl FindQuery {
    pub fn kind(&self) -> EntityKind {
        match self {
            FindQuery::Point { .. } => EntityKind::Point,
            FindQuery::Segment { .. } => EntityKind::Segment,
            FindQuery::Circle { .. } => EntityKind::Circle,
            FindQuery::Arc { .. } => EntityKind::Arc,
            FindQuery::HCLine { .. } => EntityKind::HCLine,
            FindQuery::VCLine { .. } => EntityKind::VCLine,
            FindQuery::ACLine { .. } => EntityKind::ACLine,
            FindQuery::CLine { .. } => EntityKind::CLine,
            FindQuery::CCircle { .. } => EntityKind::CCircle,
            FindQuery::Polyline { .. } => EntityKind::Polyline,
            FindQuery::Text { .. } => EntityKind::TextBlock,
        }
    }

    /// 候选实体的包围盒必然与此区域相交。
    fn probe(&self) -> Bounds2D {
        match self {
            FindQuery::Point { x, y, tolerance } => {
                Bounds2D::around(Point2::new(*x, *y), tolerance.max(EPSILON))
            }
            FindQuery::Segment { x1, y1, x2, y2 } | FindQuery::CLine { x1, y1, x2, y2 } => {
                Bounds2D::from_coords(*x1, *y1, *x2, *y2).expanded(EPSILON)
            }
            FindQuery::Circle { x, y, radius }
            | FindQuery::CCircle { x, y, radius }
            | FindQuery::Arc { x, y, radius, .. } => {
                Bounds2D::around(Point2::new(*x, *y), radius + EPSILON)
            }
            FindQuery::HCLine { y } => Bounds2D::from_coords(0.0, *y, 0.0, *y).expanded(EPSILON),
            FindQuery::VCLine { x } => Bounds2D::from_coords(*x, 0.0, *x, 0.0).expanded(EPSILON),
            FindQuery::ACLine { x, y, .. } | FindQuery::Text { x, y, .. } => {
                Bounds2D::around(Point2::new(*x, *y), EPSILON)
            }
            FindQuery::Polyline { points } => {
                let mut bounds = Bounds2D::empty();
                for point in points {
                    bounds.include_point(*point);
                }
                bounds.expanded(EPSILON)
            }
        }
    }

    fn matches(&self, entity: &Entity, shape: &Shape) -> bool {
        match (self, shape) {
            (FindQuery::Point { x, y, tolerance }, Shape::Point(point)) => {
                point.distance(Point2::new(*x, *y)) <= *tolerance
            }
            (FindQuery::Segment { x1, y1, x2, y2 }, Shape::Segment { p1, p2 }) => {
                let (a, b) = (Point2::new(*x1, *y1), Point2::new(*x2, *y2));
                (same(*p1, a) && same(*p2, b)) || (same(*p1, b) && same(*p2, a))
            }
            (FindQuery::Circle { x, y, radius }, Shape::Circle { center, radius: r })
            | (FindQuery::CCircle { x, y, radius }, Shape::CCircle { center, radius: r }) => {
                same(*center, Point2::new(*x, *y)) && (radius - r).abs() <= EPSILON
            }
            (
                FindQuery::Arc {
                    x,
                    y,
                    radius,
                    start_angle,
                    end_angle,
                },
                Shape::Arc {
                    center,
                    radius: r,
                    start_angle: start,
                    end_angle: end,
                },
            ) => {
                same(*center, Point2::new(*x, *y))
                    && (radius - r).abs() <= EPSILON
                    && same_angle(*start_angle, *start, 360.0)
                    && same_angle(*end_angle, *end, 360.0)
            }
            (FindQuery::HCLine { y }, Shape::HCLine { location }) => {
                (location.y() - y).abs() <= EPSILON
            }
            (FindQuery::VCLine { x }, Shape::VCLine { location }) => {
                (location.x() - x).abs() <= EPSILON
            }
            (FindQuery::ACLine { x, y, angle }, Shape::ACLine { angle: a, .. }) => {
                same_angle(*angle, *a, 180.0) && shape.distance(*x, *y) <= EPSILON
            }
            (FindQuery::CLine { x1, y1, x2, y2 }, Shape::CLine { .. }) => {
                shape.distance(*x1, *y1) <= EPSILON && shape.distance(*x2, *y2) <= EPSILON
            }
            (FindQuery::Polyline { points }, Shape::Polyline { points: vertices }) => {
                points.len() == vertices.len()
                    && points.iter().zip(vertices).all(|(a, b)| same(*a, *b))
            }
            (FindQuery::Text { x, y, text }, Shape::Text { .. }) => match entity.geometry() {
                Geometry::TextBlock(block) => {
                    block.text == *text && same(block.location, Point2::new(*x, *y))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// `map_point` 的一个命中：实体及其上离查询点最近的点。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapHit {
    pub id: EntityId,
    pub kind: EntityKind,
    pub point: Point2,
    pub distance: f64,
}

impl Layer {
    pub fn get_object(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    #[inline]
    pub fn has_object(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// 实体的坐标形状。
    pub fn entity_shape(&self, id: EntityId) -> Option<Shape> {
        self.shape_of(self.entities.get(&id)?)
    }

    /// 某一类的全部实体 id，升序。
    pub fn get_layer_entities(&self, kind: EntityKind) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.indices.get(kind).iter().collect();
        ids.sort_unstable();
        ids
    }

    /// 与矩形区域相交（`fully` 时为完全包含）的所有实体，升序。
    pub fn objs_in_region(
        &self,
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
        fully: bool,
    ) -> Vec<EntityId> {
        let region = Bounds2D::from_coords(xmin, ymin, xmax, ymax);
        let mut ids = Vec::new();
        for kind in EntityKind::ALL {
            ids.extend(self.indices.get(kind).get_in_region(&region, |id| {
                self.entity_shape(id)
                    .is_some_and(|shape| shape.in_region(xmin, ymin, xmax, ymax, fully))
            }));
        }
        ids.sort_unstable();
        ids
    }

    /// 精确匹配 `query` 的实体，升序；没有匹配时为空。
    pub fn find(&self, query: &FindQuery) -> Vec<EntityId> {
        let probe = query.probe();
        let mut ids = self.indices.get(query.kind()).get_in_region(&probe, |id| {
            let Some(entity) = self.entities.get(&id) else {
                return false;
            };
            self.shape_of(entity)
                .is_some_and(|shape| query.matches(entity, &shape))
        });
        ids.sort_unstable();
        ids
    }

    /// 图层中与 `entity` 值相等的实体。`entity` 带 id 时先按 id 比较。
    pub fn find_object(&self, entity: &Entity) -> Option<EntityId> {
        if let Some(id) = entity.id() {
            return self
                .entities
                .get(&id)
                .filter(|member| member.geometry() == entity.geometry())
                .map(|_| id);
        }
        self.get_layer_entities(entity.kind())
            .into_iter()
            .find(|id| {
                self.entities
                    .get(id)
                    .is_some_and(|member| member.geometry() == entity.geometry())
            })
    }

    /// 距 `(x, y)` 不超过 `tolerance` 的实体。非点实体在前，各自按距离升序；
    /// `limit` 限制返回数量。
    pub fn map_point(&self, x: f64, y: f64, tolerance: f64, limit: Option<usize>) -> Vec<MapHit> {
        let query = Point2::new(x, y);
        let region = Bounds2D::around(query, tolerance);
        let mut hits = Vec::new();
        for kind in EntityKind::ALL {
            for id in self.indices.get(kind).get_in_region(&region, |_| true) {
                let Some(point) = self
                    .entity_shape(id)
                    .and_then(|shape| shape.map_coords(x, y, tolerance))
                else {
                    continue;
                };
                hits.push(MapHit {
                    id,
                    kind,
                    point,
                    distance: point.distance(query),
                });
            }
        }
        hits.sort_by(|a, b| {
            (a.kind == EntityKind::Point)
                .cmp(&(b.kind == EntityKind::Point))
                .then(a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal))
                .then(a.id.cmp(&b.id))
        });
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        hits
    }

    /// 把 `(x, y)` 投影到容差内最近的非点实体上；没有这样的实体时再吸附到最近的点。
    pub fn map_coords(&self, x: f64, y: f64, tolerance: f64) -> Option<Point2> {
        let nearest = EntityKind::ALL
            .into_iter()
            .filter(|kind| *kind != EntityKind::Point)
            .filter_map(|kind| {
                self.indices
                    .get(kind)
                    .get_closest(x, y, tolerance, |id| self.shape_distance(id, x, y))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        if let Some(hit) = nearest
            .and_then(|(id, _)| self.entity_shape(id))
            .and_then(|shape| shape.map_coords(x, y, tolerance))
        {
            return Some(hit);
        }
        let (id, _) = self.indices.get(EntityKind::Point).get_closest(
            x,
            y,
            tolerance,
            |id| self.shape_distance(id, x, y),
        )?;
        self.point_location(id)
    }

    /// 全部实体的范围。无限长的构造线只贡献其定位点；空图层返回 `None`。
    pub fn get_boundary(&self) -> Option<Bounds2D> {
        let mut boundary = Bounds2D::empty();
        for entity in self.entities.values() {
            let Some(shape) = self.shape_of(entity) else {
                continue;
            };
            let bounds = shape.bounds();
            if bounds.is_finite() {
                boundary.include_bounds(&bounds);
            } else {
                boundary.include_point(shape.anchor());
            }
        }
        (!boundary.is_empty()).then_some(boundary)
    }

    fn shape_distance(&self, id: EntityId, x: f64, y: f64) -> f64 {
        self.entity_shape(id)
            .map_or(f64::INFINITY, |shape| shape.distance(x, y))
    }
}

fn same(a: Point2, b: Point2) -> bool {
    a.distance(b) <= EPSILON
}

/// 两个角度在 `period` 取模后是否相等。
fn same_angle(a: f64, b: f64, period: f64) -> bool {
    let diff = (normalize_degrees(a) - normalize_degrees(b)).rem_euclid(period);
    diff <= EPSILON || period - diff <= EPSILON
}
