//! 绘图核心：几何值类型、实体记录、空间索引与样式表。
//!
//! 该 crate 不持有任何可变的全局状态；实体的归属、通知与撤销由
//! `draftkit-engine` 中的图层负责。

pub mod clip;
pub mod entity;
pub mod quadtree;
pub mod shape;
pub mod style;
pub mod values;

pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 精确比较使用的容差，自动分割的默认容差与之一致。
    pub const EPSILON: f64 = 1e-10;

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn dot(self, other: Vector2) -> f64 {
            self.0.dot(other.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框。构造线在无限延伸的轴上使用 `±INFINITY`。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        /// 由任意顺序的坐标构造，自动交换使 min <= max。
        pub fn from_coords(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
            Self {
                min: Point2::new(x1.min(x2), y1.min(y2)),
                max: Point2::new(x1.max(x2), y1.max(y2)),
            }
        }

        /// 以 `center` 为中心、半宽为 `radius` 的正方形。
        pub fn around(center: Point2, radius: f64) -> Self {
            Self::from_coords(
                center.x() - radius,
                center.y() - radius,
                center.x() + radius,
                center.y() + radius,
            )
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn xmin(&self) -> f64 {
            self.min.x()
        }

        #[inline]
        pub fn ymin(&self) -> f64 {
            self.min.y()
        }

        #[inline]
        pub fn xmax(&self) -> f64 {
            self.max.x()
        }

        #[inline]
        pub fn ymax(&self) -> f64 {
            self.max.y()
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        /// 四个分量均为有限值。
        #[inline]
        pub fn is_finite(&self) -> bool {
            self.min.is_finite() && self.max.is_finite()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// 闭区间意义下的相交判断，仅接触边界也视为相交。
        #[inline]
        pub fn intersects(&self, other: &Bounds2D) -> bool {
            if self.is_empty() || other.is_empty() {
                return false;
            }
            self.min.x() <= other.max.x()
                && self.max.x() >= other.min.x()
                && self.min.y() <= other.max.y()
                && self.max.y() >= other.min.y()
        }

        #[inline]
        pub fn contains_point(&self, point: Point2) -> bool {
            point.x() >= self.min.x()
                && point.x() <= self.max.x()
                && point.y() >= self.min.y()
                && point.y() <= self.max.y()
        }

        #[inline]
        pub fn contains_bounds(&self, other: &Bounds2D) -> bool {
            !other.is_empty() && self.contains_point(other.min) && self.contains_point(other.max)
        }

        /// 向四周各扩展 `margin`。
        pub fn expanded(&self, margin: f64) -> Bounds2D {
            Bounds2D::new(
                Point2::new(self.min.x() - margin, self.min.y() - margin),
                Point2::new(self.max.x() + margin, self.max.y() + margin),
            )
        }

        /// 点到边界框的最短距离，点在框内时为 0。
        pub fn distance_to(&self, point: Point2) -> f64 {
            let dx = (self.min.x() - point.x()).max(point.x() - self.max.x()).max(0.0);
            let dy = (self.min.y() - point.y()).max(point.y() - self.max.y()).max(0.0);
            dx.hypot(dy)
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let min_vec = self.min.as_vec2();
            let max_vec = self.max.as_vec2();
            let center = (min_vec + max_vec) * 0.5;
            Point2::from_vec(center)
        }
    }

    /// 把角度（度）归一化到 `[0, 360)`。
    pub fn normalize_degrees(angle: f64) -> f64 {
        let mut result = angle % 360.0;
        if result < 0.0 {
            result += 360.0;
        }
        if result >= 360.0 {
            result -= 360.0;
        }
        result
    }

    /// 从 `start` 逆时针扫到 `end` 的角度，范围 `(0, 360]`；起止相同表示整圆。
    pub fn sweep_degrees(start: f64, end: f64) -> f64 {
        let sweep = normalize_degrees(end - start);
        if sweep.abs() < EPSILON { 360.0 } else { sweep }
    }

    /// `angle` 是否落在从 `start` 逆时针扫过 `sweep` 度的区间内（含端点，带容差）。
    pub fn angle_within(angle: f64, start: f64, sweep: f64, tolerance: f64) -> bool {
        if sweep >= 360.0 {
            return true;
        }
        let offset = normalize_degrees(angle - start);
        offset <= sweep + tolerance || offset >= 360.0 - tolerance
    }

    /// 从圆心指向 `point` 的方位角（度），范围 `[0, 360)`。
    pub fn bearing_degrees(center: Point2, point: Point2) -> f64 {
        let v = center.vector_to(point);
        normalize_degrees(v.y().atan2(v.x()).to_degrees())
    }

    /// 圆上指定角度（度）处的点。
    pub fn point_at_degrees(center: Point2, radius: f64, angle: f64) -> Point2 {
        let radians = angle.to_radians();
        center.translate(Vector2::new(radius * radians.cos(), radius * radians.sin()))
    }

}

pub mod errors {
    use thiserror::Error;

    /// 几何参数非法。界面层应捕获并提示用户，而不是中止程序。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum GeometryError {
        #[error("{what} must be finite")]
        NonFinite { what: &'static str },
        #[error("invalid radius {0}: must be positive")]
        InvalidRadius(f64),
        #[error("invalid text size {0}: must be positive")]
        InvalidTextSize(f64),
        #[error("invalid thickness {0}: must not be negative")]
        InvalidThickness(f64),
        #[error("invalid scale {0}: must be positive")]
        InvalidScale(f64),
        #[error("line is degenerate: both ends reference the same point")]
        DegenerateLine,
        #[error("polyline needs at least 2 points, got {0}")]
        TooFewPoints(usize),
        #[error("invalid dash pattern: {0}")]
        InvalidDashes(String),
        #[error("type tag `{tag}` does not match {geometry} geometry")]
        KindMismatch {
            tag: &'static str,
            geometry: &'static str,
        },
    }
}
