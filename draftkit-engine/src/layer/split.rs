use draftkit_core::entity::{Arc, Entity, EntityId, EntityKind, Geometry, Polyline, Segment};
use draftkit_core::geometry::Bounds2D;
use draftkit_core::shape::SplitSite;
use tracing::debug;

use super::Layer;
use crate::errors::LayerError;
use crate::undo::Replay;

/// 参与自动分割的实体类别。
const SPLITTABLE: [EntityKind; 4] = [
    EntityKind::Segment,
    EntityKind::Circle,
    EntityKind::Arc,
    EntityKind::Polyline,
];

impl Layer {
    /// 新点落在线段、圆、圆弧或多段线内部时，把该实体分成以新点为端点的几段。
    ///
    /// 先加入新片段再删除原实体，保证原实体的端点在整个过程中始终有使用者。
    /// 锁定的实体和仍被其他实体（如标注）使用的实体不分割。
    pub(super) fn split_at_point(&mut self, point: EntityId) -> Result<usize, LayerError> {
        let Some(location) = self.point_location(point) else {
            return Ok(0);
        };
        let tolerance = self.settings.split_tolerance;
        let probe = Bounds2D::around(location, tolerance);
        let mut splits = 0;

        for kind in SPLITTABLE {
            let candidates = self.indices.get(kind).get_in_region(&probe, |_| true);
            for candidate in candidates {
                let Some(entity) = self.entities.get(&candidate) else {
                    continue;
                };
                if entity.is_locked() || entity.has_users() {
                    continue;
                }
                let Some(site) = self
                    .shape_of(entity)
                    .and_then(|shape| shape.split_site(location, tolerance))
                else {
                    continue;
                };
                let pieces = split_pieces(entity, point, site)?;
                let count = pieces.len();
                for piece in pieces {
                    self.insert_entity(piece, Replay::None, Some(false))?;
                }
                self.delete_entity(candidate, Replay::None)?;
                debug!(
                    layer = %self.id,
                    point = %point,
                    original = %candidate,
                    kind = %kind,
                    pieces = count,
                    "entity split"
                );
                splits += 1;
            }
        }
        Ok(splits)
    }
}

fn split_pieces(entity: &Entity, point: EntityId, site: SplitSite) -> Result<Vec<Entity>, LayerError> {
    let geometries = match (entity.geometry(), site) {
        (Geometry::Segment(segment), SplitSite::Segment { .. }) => vec![
            Geometry::Segment(Segment {
                p1: segment.p1,
                p2: point,
            }),
            Geometry::Segment(Segment {
                p1: point,
                p2: segment.p2,
            }),
        ],
        // 整圆在新点处断开，得到起止角相同的整圆弧。
        (Geometry::Circle(circle), SplitSite::Circle { angle }) => vec![Geometry::Arc(Arc {
            center: circle.center,
            radius: circle.radius,
            start_angle: angle,
            end_angle: angle,
        })],
        (Geometry::Arc(arc), SplitSite::Arc { angle }) => vec![
            Geometry::Arc(Arc {
                end_angle: angle,
                ..*arc
            }),
            Geometry::Arc(Arc {
                start_angle: angle,
                ..*arc
            }),
        ],
        (Geometry::Polyline(polyline), SplitSite::Polyline { index }) => {
            let mut head = polyline.points[..=index].to_vec();
            head.push(point);
            let mut tail = vec![point];
            tail.extend_from_slice(&polyline.points[index + 1..]);
            vec![
                Geometry::Polyline(Polyline { points: head }),
                Geometry::Polyline(Polyline { points: tail }),
            ]
        }
        (geometry, site) => {
            return Err(LayerError::InvalidArgument(format!(
                "cannot split a {} at {site:?}",
                geometry.kind()
            )));
        }
    };

    geometries
        .into_iter()
        .map(|geometry| -> Result<Entity, LayerError> {
            let mut piece = Entity::new(geometry)?.with_attributes(entity.attributes().clone())?;
            piece.set_visible(entity.is_visible());
            Ok(piece)
        })
        .collect()
}
