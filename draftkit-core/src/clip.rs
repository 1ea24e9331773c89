//! 圆与矩形区域的裁剪。

use crate::geometry::{EPSILON, Bounds2D, Point2, bearing_degrees, normalize_degrees, point_at_degrees};

/// 圆上的一段可见弧，`start` 位于 `[0, 360)`，`sweep` 位于 `(0, 360]`，逆时针。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcSpan {
    pub start: f64,
    pub sweep: f64,
}

impl ArcSpan {
    #[inline]
    pub fn full() -> Self {
        Self {
            start: 0.0,
            sweep: 360.0,
        }
    }

    #[inline]
    pub fn end(&self) -> f64 {
        normalize_degrees(self.start + self.sweep)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.sweep >= 360.0 - EPSILON
    }
}

/// 圆与区域四条边所在直线是否相交，每条边占一位，共 16 种组合。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossings(u8);

impl Crossings {
    pub const LEFT: u8 = 0b0001;
    pub const RIGHT: u8 = 0b0010;
    pub const BOTTOM: u8 = 0b0100;
    pub const TOP: u8 = 0b1000;

    pub fn of(center: Point2, radius: f64, region: &Bounds2D) -> Self {
        let mut bits = 0;
        if (center.x() - region.xmin()).abs() < radius {
            bits |= Self::LEFT;
        }
        if (center.x() - region.xmax()).abs() < radius {
            bits |= Self::RIGHT;
        }
        if (center.y() - region.ymin()).abs() < radius {
            bits |= Self::BOTTOM;
        }
        if (center.y() - region.ymax()).abs() < radius {
            bits |= Self::TOP;
        }
        Self(bits)
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// 计算圆落在区域内的可见弧段。
///
/// 没有任何边线与圆相交时，圆要么完全在区域内（返回整圆），要么完全不可见。
/// 其余情况按交点角度排序，用相邻交点中点是否在区域内决定该段是否可见，
/// 跨越 0° 的首尾两段会被合并。
pub fn clip_circle(center: Point2, radius: f64, region: &Bounds2D) -> Vec<ArcSpan> {
    if !(radius > 0.0) || region.is_empty() {
        return Vec::new();
    }
    let crossings = Crossings::of(center, radius, region);
    if crossings.is_empty() {
        return if region.contains_point(center) {
            vec![ArcSpan::full()]
        } else {
            Vec::new()
        };
    }

    let mut angles = masked_crossings(center, radius, region, crossings);
    angles.sort_by(f64::total_cmp);
    angles.dedup_by(|a, b| (*a - *b).abs() <= 1e-9);
    if angles.len() > 1 && angles[0] + 360.0 - angles[angles.len() - 1] <= 1e-9 {
        angles.pop();
    }
    if angles.len() < 2 {
        // 只与区域角点或边相切，没有长度非零的可见弧。
        return Vec::new();
    }

    let probe = region.expanded(1e-9);
    let mut spans: Vec<ArcSpan> = Vec::new();
    for index in 0..angles.len() {
        let start = angles[index];
        let end = if index + 1 < angles.len() {
            angles[index + 1]
        } else {
            angles[0] + 360.0
        };
        let middle = point_at_degrees(center, radius, (start + end) * 0.5);
        if !probe.contains_point(middle) {
            continue;
        }
        match spans.last_mut() {
            Some(last) if (last.start + last.sweep - start).abs() <= 1e-9 => {
                last.sweep += end - start;
            }
            _ => spans.push(ArcSpan {
                start,
                sweep: end - start,
            }),
        }
    }

    if spans.len() > 1 {
        let last = spans[spans.len() - 1];
        let first = spans[0];
        if (normalize_degrees(last.start + last.sweep) - first.start).abs() <= 1e-9 {
            spans.pop();
            spans[0] = ArcSpan {
                start: last.start,
                sweep: last.sweep + first.sweep,
            };
        }
    }
    for span in &mut spans {
        span.start = normalize_degrees(span.start);
        span.sweep = span.sweep.min(360.0);
    }
    spans
}

/// 圆与区域边界（限于边的实际长度内）的所有交点方位角，未排序。
pub(crate) fn edge_crossings(center: Point2, radius: f64, region: &Bounds2D) -> Vec<f64> {
    masked_crossings(center, radius, region, Crossings::of(center, radius, region))
}

fn masked_crossings(center: Point2, radius: f64, region: &Bounds2D, mask: Crossings) -> Vec<f64> {
    let mut angles = Vec::with_capacity(8);
    let tolerance = EPSILON * radius.max(1.0);

    for (flag, x) in [(Crossings::LEFT, region.xmin()), (Crossings::RIGHT, region.xmax())] {
        if !mask.contains(flag) {
            continue;
        }
        let half = (radius * radius - (x - center.x()).powi(2)).max(0.0).sqrt();
        for y in [center.y() - half, center.y() + half] {
            if y >= region.ymin() - tolerance && y <= region.ymax() + tolerance {
                angles.push(bearing_degrees(center, Point2::new(x, y)));
            }
        }
    }
    for (flag, y) in [(Crossings::BOTTOM, region.ymin()), (Crossings::TOP, region.ymax())] {
        if !mask.contains(flag) {
            continue;
        }
        let half = (radius * radius - (y - center.y()).powi(2)).max(0.0).sqrt();
        for x in [center.x() - half, center.x() + half] {
            if x >= region.xmin() - tolerance && x <= region.xmax() + tolerance {
                angles.push(bearing_degrees(center, Point2::new(x, y)));
            }
        }
    }
    angles
}
