//! 解析后的几何形状。
//!
//! 实体只通过 id 引用点；图层把 id 替换成坐标后得到 `Shape`，
//! 所有与坐标有关的查询（包围盒、捕捉、区域判断、分割检测）都在这里完成。

use std::f64::consts::TAU;

use crate::clip;
use crate::geometry::{
    EPSILON, Bounds2D, Point2, Vector2, angle_within, bearing_degrees, point_at_degrees,
    sweep_degrees,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Point2),
    Segment {
        p1: Point2,
        p2: Point2,
    },
    Circle {
        center: Point2,
        radius: f64,
    },
    /// 角度单位为度，0° 指向 +x，逆时针为正。
    Arc {
        center: Point2,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    HCLine {
        location: Point2,
    },
    VCLine {
        location: Point2,
    },
    ACLine {
        location: Point2,
        angle: f64,
    },
    CLine {
        p1: Point2,
        p2: Point2,
    },
    CCircle {
        center: Point2,
        radius: f64,
    },
    Polyline {
        points: Vec<Point2>,
    },
    Text {
        bounds: Bounds2D,
    },
    Dimension {
        anchors: Vec<Point2>,
        location: Point2,
    },
}

/// 新点落在实体内部的位置，自动分割据此生成新的片段。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitSite {
    /// 线段参数 t，严格位于 (0, 1)。
    Segment { parameter: f64 },
    Circle { angle: f64 },
    Arc { angle: f64 },
    /// 新点位于第 `index` 段（`points[index]` 到 `points[index + 1]`）内部。
    Polyline { index: usize },
}

impl Shape {
    /// 轴对齐包围盒，构造线在无限轴上为 `±INFINITY`。
    pub fn bounds(&self) -> Bounds2D {
        match self {
            Shape::Point(point) => Bounds2D::new(*point, *point),
            Shape::Segment { p1, p2 } => Bounds2D::from_coords(p1.x(), p1.y(), p2.x(), p2.y()),
            Shape::Circle { center, radius } | Shape::CCircle { center, radius } => {
                Bounds2D::around(*center, *radius)
            }
            Shape::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => arc_bounds(*center, *radius, *start_angle, *end_angle),
            Shape::HCLine { location } => horizontal_bounds(location.y()),
            Shape::VCLine { location } => vertical_bounds(location.x()),
            Shape::ACLine { location, angle } => {
                infinite_line_bounds(*location, direction_from_degrees(*angle))
            }
            Shape::CLine { p1, p2 } => infinite_line_bounds(*p1, p1.vector_to(*p2)),
            Shape::Polyline { points } => {
                let mut bounds = Bounds2D::empty();
                for point in points {
                    bounds.include_point(*point);
                }
                bounds
            }
            Shape::Text { bounds } => *bounds,
            Shape::Dimension { anchors, location } => {
                let mut bounds = Bounds2D::new(*location, *location);
                for point in anchors {
                    bounds.include_point(*point);
                }
                bounds
            }
        }
    }

    /// 形状上离 `query` 最近的点。
    pub fn nearest_point(&self, query: Point2) -> Point2 {
        match self {
            Shape::Point(point) => *point,
            Shape::Segment { p1, p2 } => project_onto_segment(*p1, *p2, query).1,
            Shape::Circle { center, radius } | Shape::CCircle { center, radius } => {
                project_onto_circle(*center, *radius, query)
            }
            Shape::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                let sweep = sweep_degrees(*start_angle, *end_angle);
                let angle = bearing_degrees(*center, query);
                if center.distance(query) > EPSILON && angle_within(angle, *start_angle, sweep, 0.0)
                {
                    return project_onto_circle(*center, *radius, query);
                }
                let start = point_at_degrees(*center, *radius, *start_angle);
                let end = point_at_degrees(*center, *radius, *end_angle);
                if start.distance(query) <= end.distance(query) {
                    start
                } else {
                    end
                }
            }
            Shape::HCLine { location } => Point2::new(query.x(), location.y()),
            Shape::VCLine { location } => Point2::new(location.x(), query.y()),
            Shape::ACLine { location, angle } => {
                project_onto_line(*location, direction_from_degrees(*angle), query)
            }
            Shape::CLine { p1, p2 } => project_onto_line(*p1, p1.vector_to(*p2), query),
            Shape::Polyline { points } => {
                let mut best = points.first().copied().unwrap_or(query);
                let mut best_distance = best.distance(query);
                for pair in points.windows(2) {
                    let (_, candidate) = project_onto_segment(pair[0], pair[1], query);
                    let distance = candidate.distance(query);
                    if distance < best_distance {
                        best = candidate;
                        best_distance = distance;
                    }
                }
                best
            }
            Shape::Text { .. } | Shape::Dimension { .. } => clamp_to_bounds(&self.bounds(), query),
        }
    }

    #[inline]
    pub fn distance(&self, x: f64, y: f64) -> f64 {
        let query = Point2::new(x, y);
        self.nearest_point(query).distance(query)
    }

    /// 若 `(x, y)` 与形状的距离不超过 `tolerance`，返回投影点。
    pub fn map_coords(&self, x: f64, y: f64, tolerance: f64) -> Option<Point2> {
        let query = Point2::new(x, y);
        let projected = self.nearest_point(query);
        (projected.distance(query) <= tolerance).then_some(projected)
    }

    /// 与矩形区域的可见性判断；`fully` 要求完全包含。无限长构造线永远不会被完全包含。
    pub fn in_region(&self, xmin: f64, ymin: f64, xmax: f64, ymax: f64, fully: bool) -> bool {
        let region = Bounds2D::from_coords(xmin, ymin, xmax, ymax);
        match self {
            Shape::Point(point) => region.contains_point(*point),
            Shape::Segment { p1, p2 } => {
                if fully {
                    region.contains_point(*p1) && region.contains_point(*p2)
                } else {
                    segment_touches_region(*p1, *p2, &region)
                }
            }
            Shape::Circle { center, radius } | Shape::CCircle { center, radius } => {
                if fully {
                    region.contains_bounds(&self.bounds())
                } else {
                    circle_touches_region(*center, *radius, &region)
                }
            }
            Shape::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                if fully {
                    return region.contains_bounds(&self.bounds());
                }
                let start = point_at_degrees(*center, *radius, *start_angle);
                let end = point_at_degrees(*center, *radius, *end_angle);
                if region.contains_point(start) || region.contains_point(end) {
                    return true;
                }
                let sweep = sweep_degrees(*start_angle, *end_angle);
                clip::edge_crossings(*center, *radius, &region)
                    .into_iter()
                    .any(|angle| angle_within(angle, *start_angle, sweep, 1e-9))
            }
            Shape::HCLine { location } => {
                !fully && location.y() >= region.ymin() && location.y() <= region.ymax()
            }
            Shape::VCLine { location } => {
                !fully && location.x() >= region.xmin() && location.x() <= region.xmax()
            }
            Shape::ACLine { location, angle } => {
                !fully && line_touches_region(*location, direction_from_degrees(*angle), &region)
            }
            Shape::CLine { p1, p2 } => {
                !fully && line_touches_region(*p1, p1.vector_to(*p2), &region)
            }
            Shape::Polyline { points } => {
                if fully {
                    points.iter().all(|p| region.contains_point(*p))
                } else if points.len() == 1 {
                    region.contains_point(points[0])
                } else {
                    points
                        .windows(2)
                        .any(|pair| segment_touches_region(pair[0], pair[1], &region))
                }
            }
            Shape::Text { .. } | Shape::Dimension { .. } => {
                let bounds = self.bounds();
                if fully {
                    region.contains_bounds(&bounds)
                } else {
                    region.intersects(&bounds)
                }
            }
        }
    }

    /// 有长度概念的形状返回其长度。
    pub fn length(&self) -> Option<f64> {
        match self {
            Shape::Segment { p1, p2 } => Some(p1.distance(*p2)),
            Shape::Circle { radius, .. } | Shape::CCircle { radius, .. } => Some(TAU * radius),
            Shape::Arc {
                radius,
                start_angle,
                end_angle,
                ..
            } => Some(radius * sweep_degrees(*start_angle, *end_angle).to_radians()),
            Shape::Polyline { points } => Some(
                points
                    .windows(2)
                    .map(|pair| pair[0].distance(pair[1]))
                    .sum(),
            ),
            _ => None,
        }
    }

    /// 用于计算图层范围的代表点，无限长构造线取其定位点。
    pub fn anchor(&self) -> Point2 {
        match self {
            Shape::Point(point) => *point,
            Shape::Segment { p1, .. } | Shape::CLine { p1, .. } => *p1,
            Shape::Circle { center, .. }
            | Shape::CCircle { center, .. }
            | Shape::Arc { center, .. } => *center,
            Shape::HCLine { location }
            | Shape::VCLine { location }
            | Shape::ACLine { location, .. } => *location,
            Shape::Polyline { points } => points
                .first()
                .copied()
                .unwrap_or_else(|| Point2::new(0.0, 0.0)),
            Shape::Text { bounds } => bounds.min(),
            Shape::Dimension { location, .. } => *location,
        }
    }

    /// 检测点 `at` 是否位于可分割实体的内部（不含已有端点/顶点）。
    ///
    /// 各类型的判定方式不同：线段和多段线用垂足距离加参数区间，
    /// 圆用径向距离，圆弧再额外要求方位角严格落在弧内。
    pub fn split_site(&self, at: Point2, tolerance: f64) -> Option<SplitSite> {
        match self {
            Shape::Segment { p1, p2 } => {
                if at.distance(*p1) <= tolerance || at.distance(*p2) <= tolerance {
                    return None;
                }
                let (parameter, projected) = project_onto_segment(*p1, *p2, at);
                (projected.distance(at) <= tolerance && parameter > 0.0 && parameter < 1.0)
                    .then_some(SplitSite::Segment { parameter })
            }
            Shape::Circle { center, radius } => {
                ((center.distance(at) - radius).abs() <= tolerance).then(|| SplitSite::Circle {
                    angle: bearing_degrees(*center, at),
                })
            }
            Shape::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                if (center.distance(at) - radius).abs() > tolerance {
                    return None;
                }
                let start = point_at_degrees(*center, *radius, *start_angle);
                let end = point_at_degrees(*center, *radius, *end_angle);
                if at.distance(start) <= tolerance || at.distance(end) <= tolerance {
                    return None;
                }
                let angle = bearing_degrees(*center, at);
                let sweep = sweep_degrees(*start_angle, *end_angle);
                angle_within(angle, *start_angle, sweep, 0.0).then_some(SplitSite::Arc { angle })
            }
            Shape::Polyline { points } => {
                if points.iter().any(|p| p.distance(at) <= tolerance) {
                    return None;
                }
                points.windows(2).enumerate().find_map(|(index, pair)| {
                    let (parameter, projected) = project_onto_segment(pair[0], pair[1], at);
                    (projected.distance(at) <= tolerance && parameter > 0.0 && parameter < 1.0)
                        .then_some(SplitSite::Polyline { index })
                })
            }
            _ => None,
        }
    }
}

/// 估算文本包围盒：每个字符宽度取字高的 0.6 倍，考虑旋转角（度）。
pub fn text_bounds(location: Point2, text: &str, size: f64, angle: f64) -> Bounds2D {
    let longest = text
        .lines()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0);
    let line_count = text.lines().count().max(1);
    let width = longest as f64 * size * 0.6;
    let height = line_count as f64 * size;

    let (sin, cos) = angle.to_radians().sin_cos();
    let mut bounds = Bounds2D::empty();
    for (dx, dy) in [(0.0, 0.0), (width, 0.0), (width, height), (0.0, height)] {
        bounds.include_point(Point2::new(
            location.x() + dx * cos - dy * sin,
            location.y() + dx * sin + dy * cos,
        ));
    }
    bounds
}

fn arc_bounds(center: Point2, radius: f64, start_angle: f64, end_angle: f64) -> Bounds2D {
    let mut bounds = Bounds2D::empty();
    bounds.include_point(point_at_degrees(center, radius, start_angle));
    bounds.include_point(point_at_degrees(center, radius, end_angle));
    let sweep = sweep_degrees(start_angle, end_angle);
    for quadrant in [0.0, 90.0, 180.0, 270.0] {
        if angle_within(quadrant, start_angle, sweep, 0.0) {
            bounds.include_point(point_at_degrees(center, radius, quadrant));
        }
    }
    bounds
}

fn horizontal_bounds(y: f64) -> Bounds2D {
    Bounds2D::new(
        Point2::new(f64::NEG_INFINITY, y),
        Point2::new(f64::INFINITY, y),
    )
}

fn vertical_bounds(x: f64) -> Bounds2D {
    Bounds2D::new(
        Point2::new(x, f64::NEG_INFINITY),
        Point2::new(x, f64::INFINITY),
    )
}

fn infinite_line_bounds(origin: Point2, direction: Vector2) -> Bounds2D {
    let length = direction.length();
    if length <= EPSILON {
        return Bounds2D::new(origin, origin);
    }
    if direction.y().abs() <= EPSILON * length {
        horizontal_bounds(origin.y())
    } else if direction.x().abs() <= EPSILON * length {
        vertical_bounds(origin.x())
    } else {
        Bounds2D::new(
            Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            Point2::new(f64::INFINITY, f64::INFINITY),
        )
    }
}

fn direction_from_degrees(angle: f64) -> Vector2 {
    let (sin, cos) = angle.to_radians().sin_cos();
    Vector2::new(cos, sin)
}

/// 返回钳制到 [0, 1] 的参数以及对应的投影点。
fn project_onto_segment(p1: Point2, p2: Point2, query: Point2) -> (f64, Point2) {
    let v = p1.vector_to(p2);
    let len_sq = v.length_squared();
    if len_sq <= EPSILON * EPSILON {
        return (0.0, p1);
    }
    let t = (p1.vector_to(query).dot(v) / len_sq).clamp(0.0, 1.0);
    (t, Point2::from_vec(p1.as_vec2() + v.as_vec2() * t))
}

fn project_onto_line(origin: Point2, direction: Vector2, query: Point2) -> Point2 {
    let len_sq = direction.length_squared();
    if len_sq <= EPSILON * EPSILON {
        return origin;
    }
    let t = origin.vector_to(query).dot(direction) / len_sq;
    Point2::from_vec(origin.as_vec2() + direction.as_vec2() * t)
}

fn project_onto_circle(center: Point2, radius: f64, query: Point2) -> Point2 {
    let offset = center.vector_to(query);
    let distance = offset.length();
    if distance <= EPSILON {
        return point_at_degrees(center, radius, 0.0);
    }
    Point2::from_vec(center.as_vec2() + offset.as_vec2() * (radius / distance))
}

fn clamp_to_bounds(bounds: &Bounds2D, query: Point2) -> Point2 {
    Point2::new(
        query.x().clamp(bounds.xmin(), bounds.xmax()),
        query.y().clamp(bounds.ymin(), bounds.ymax()),
    )
}

/// Liang–Barsky 裁剪，只判断是否存在可见部分。
fn segment_touches_region(p1: Point2, p2: Point2, region: &Bounds2D) -> bool {
    let dx = p2.x() - p1.x();
    let dy = p2.y() - p1.y();
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    let checks = [
        (-dx, p1.x() - region.xmin()),
        (dx, region.xmax() - p1.x()),
        (-dy, p1.y() - region.ymin()),
        (dy, region.ymax() - p1.y()),
    ];
    for (p, q) in checks {
        if p.abs() <= f64::EPSILON {
            if q < 0.0 {
                return false;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return false;
        }
    }
    true
}

fn line_touches_region(origin: Point2, direction: Vector2, region: &Bounds2D) -> bool {
    if direction.length_squared() <= EPSILON * EPSILON {
        return region.contains_point(origin);
    }
    let corners = [
        Point2::new(region.xmin(), region.ymin()),
        Point2::new(region.xmax(), region.ymin()),
        Point2::new(region.xmax(), region.ymax()),
        Point2::new(region.xmin(), region.ymax()),
    ];
    let mut positive = false;
    let mut negative = false;
    for corner in corners {
        let offset = origin.vector_to(corner);
        let side = direction.x() * offset.y() - direction.y() * offset.x();
        if side.abs() <= EPSILON {
            return true;
        }
        if side > 0.0 {
            positive = true;
        } else {
            negative = true;
        }
    }
    positive && negative
}

fn circle_touches_region(center: Point2, radius: f64, region: &Bounds2D) -> bool {
    if region.distance_to(center) > radius {
        return false;
    }
    // 区域四角都在圆内时圆周不经过区域。
    let corners = [
        Point2::new(region.xmin(), region.ymin()),
        Point2::new(region.xmax(), region.ymin()),
        Point2::new(region.xmax(), region.ymax()),
        Point2::new(region.xmin(), region.ymax()),
    ];
    !corners
        .iter()
        .all(|corner| corner.distance(center) < radius - EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(x: f64, y: f64, radius: f64) -> Shape {
        Shape::Circle {
            center: Point2::new(x, y),
            radius,
        }
    }

    #[test]
    fn circle_region_overlap_scenarios() {
        let shape = circle(0.0, 0.0, 5.0);
        assert!(shape.in_region(-10.0, -10.0, 0.0, 10.0, false));
        assert!(!shape.in_region(10.0, 10.0, 20.0, 20.0, false));
        assert!(!shape.in_region(-1.0, -1.0, 1.0, 1.0, false));
        assert!(shape.in_region(-5.0, -5.0, 5.0, 5.0, true));
        assert!(!shape.in_region(-10.0, -10.0, 0.0, 10.0, true));
    }

    #[test]
    fn segment_projection_respects_tolerance() {
        let shape = Shape::Segment {
            p1: Point2::new(0.0, 0.0),
            p2: Point2::new(10.0, 0.0),
        };
        let hit = shape.map_coords(4.0, 0.5, 1.0).expect("within tolerance");
        assert_eq!(hit, Point2::new(4.0, 0.0));
        assert!(shape.map_coords(4.0, 2.0, 1.0).is_none());
        assert_eq!(shape.map_coords(-3.0, 0.0, 5.0), Some(Point2::new(0.0, 0.0)));
        assert!(shape.in_region(2.0, -1.0, 3.0, 1.0, false));
        assert!(!shape.in_region(2.0, 1.0, 3.0, 2.0, false));
    }

    #[test]
    fn arc_bounds_include_crossed_quadrants() {
        let shape = Shape::Arc {
            center: Point2::new(0.0, 0.0),
            radius: 2.0,
            start_angle: 45.0,
            end_angle: 135.0,
        };
        let bounds = shape.bounds();
        assert!((bounds.ymax() - 2.0).abs() < 1e-12);
        assert!((bounds.xmin() + 2.0_f64.sqrt()).abs() < 1e-12);
        assert!(shape.in_region(-0.5, 1.5, 0.5, 2.5, false));
        assert!(!shape.in_region(-0.5, -2.5, 0.5, -1.5, false));
    }

    #[test]
    fn construction_lines_are_unbounded() {
        let hline = Shape::HCLine {
            location: Point2::new(3.0, 7.0),
        };
        assert!(!hline.bounds().is_finite());
        assert!(hline.in_region(100.0, 0.0, 200.0, 10.0, false));
        assert!(!hline.in_region(100.0, 0.0, 200.0, 10.0, true));
        assert_eq!(hline.map_coords(50.0, 7.2, 0.5), Some(Point2::new(50.0, 7.0)));

        let acline = Shape::ACLine {
            location: Point2::new(0.0, 0.0),
            angle: 45.0,
        };
        assert!(acline.in_region(4.0, 4.0, 6.0, 6.0, false));
        assert!(!acline.in_region(4.0, -6.0, 6.0, -4.0, false));
        let projected = acline.map_coords(2.0, 0.0, 2.0).expect("near the diagonal");
        assert!((projected.x() - 1.0).abs() < 1e-12 && (projected.y() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn split_sites_exclude_endpoints() {
        let segment = Shape::Segment {
            p1: Point2::new(0.0, 0.0),
            p2: Point2::new(10.0, 0.0),
        };
        assert_eq!(
            segment.split_site(Point2::new(5.0, 0.0), EPSILON),
            Some(SplitSite::Segment { parameter: 0.5 })
        );
        assert!(segment.split_site(Point2::new(10.0, 0.0), EPSILON).is_none());
        assert!(segment.split_site(Point2::new(5.0, 0.1), EPSILON).is_none());

        let arc = Shape::Arc {
            center: Point2::new(0.0, 0.0),
            radius: 1.0,
            start_angle: 0.0,
            end_angle: 90.0,
        };
        let inside = point_at_degrees(Point2::new(0.0, 0.0), 1.0, 30.0);
        assert!(matches!(
            arc.split_site(inside, 1e-9),
            Some(SplitSite::Arc { angle }) if (angle - 30.0).abs() < 1e-9
        ));
        let outside = point_at_degrees(Point2::new(0.0, 0.0), 1.0, 180.0);
        assert!(arc.split_site(outside, 1e-9).is_none());

        let polyline = Shape::Polyline {
            points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(4.0, 0.0),
                Point2::new(4.0, 4.0),
            ],
        };
        assert_eq!(
            polyline.split_site(Point2::new(4.0, 1.0), EPSILON),
            Some(SplitSite::Polyline { index: 1 })
        );
        assert!(polyline.split_site(Point2::new(4.0, 0.0), EPSILON).is_none());
    }

    #[test]
    fn lengths() {
        let polyline = Shape::Polyline {
            points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(3.0, 4.0),
                Point2::new(3.0, 10.0),
            ],
        };
        assert_eq!(polyline.length(), Some(11.0));
        let arc = Shape::Arc {
            center: Point2::new(0.0, 0.0),
            radius: 2.0,
            start_angle: 0.0,
            end_angle: 0.0,
        };
        assert!((arc.length().unwrap() - TAU * 2.0).abs() < 1e-12);
        assert!(Shape::HCLine { location: Point2::new(0.0, 0.0) }.length().is_none());
    }

    #[test]
    fn text_bounds_grow_with_content() {
        let bounds = text_bounds(Point2::new(1.0, 2.0), "abcd", 2.0, 0.0);
        assert!((bounds.width() - 4.8).abs() < 1e-12);
        assert!((bounds.height() - 2.0).abs() < 1e-12);
        let shape = Shape::Text { bounds };
        assert_eq!(shape.map_coords(2.0, 3.0, 0.0), Some(Point2::new(2.0, 3.0)));
    }
}
