use draftkit_core::entity::{Entity, EntityId, EntityKind};
use draftkit_core::geometry::{Point2, point_at_degrees};
use draftkit_core::shape::Shape;
use draftkit_engine::layer::Layer;

const TOLERANCE: f64 = 1e-10;

fn point(layer: &mut Layer, x: f64, y: f64) -> EntityId {
    layer.add_object(Entity::point(x, y).unwrap()).unwrap()
}

fn total_length(layer: &Layer, kind: EntityKind) -> f64 {
    layer
        .get_layer_entities(kind)
        .into_iter()
        .filter_map(|id| layer.entity_shape(id))
        .filter_map(|shape| shape.length())
        .sum()
}

fn segment_ends(layer: &Layer, id: EntityId) -> (Point2, Point2) {
    match layer.entity_shape(id) {
        Some(Shape::Segment { p1, p2 }) => (p1, p2),
        other => panic!("{id} is not a segment: {other:?}"),
    }
}

#[test]
fn point_on_segment_splits_it_in_two() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let original = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    let snapshot = layer.get_object(original).unwrap().clone();

    let middle = point(&mut layer, 5.0, 0.0);

    let segments = layer.get_layer_entities(EntityKind::Segment);
    assert_eq!(segments.len(), 2);
    assert!(!layer.has_object(original));
    assert_eq!(layer.find_object(&snapshot), None);

    let mut ends: Vec<(Point2, Point2)> = segments
        .iter()
        .map(|id| segment_ends(&layer, *id))
        .collect();
    ends.sort_by(|a, b| a.0.x().total_cmp(&b.0.x()));
    assert_eq!(
        ends,
        vec![
            (Point2::new(0.0, 0.0), Point2::new(5.0, 0.0)),
            (Point2::new(5.0, 0.0), Point2::new(10.0, 0.0)),
        ]
    );
    assert!((total_length(&layer, EntityKind::Segment) - 10.0).abs() <= TOLERANCE);

    let shared = layer.get_object(middle).unwrap();
    assert_eq!(shared.count_users(), 2);
    assert_eq!(layer.get_object(p1).unwrap().count_users(), 1);
    assert_eq!(layer.get_object(p2).unwrap().count_users(), 1);
}

#[test]
fn off_center_split_preserves_length() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 1.0, 1.0);
    let p2 = point(&mut layer, 8.0, 4.5);
    layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    let before = total_length(&layer, EntityKind::Segment);

    // (1, 1) + 0.3 * (7, 3.5)
    point(&mut layer, 3.1, 2.05);

    assert_eq!(layer.get_layer_entities(EntityKind::Segment).len(), 2);
    assert!((total_length(&layer, EntityKind::Segment) - before).abs() <= TOLERANCE);
}

#[test]
fn endpoints_and_distant_points_do_not_split() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();

    point(&mut layer, 10.0, 0.0);
    point(&mut layer, 5.0, 1e-3);
    point(&mut layer, 12.0, 0.0);

    assert_eq!(layer.get_layer_entities(EntityKind::Segment), vec![segment]);
}

#[test]
fn autosplit_can_be_suppressed() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();

    layer
        .add_object_with(Entity::point(5.0, 0.0).unwrap(), Some(false))
        .unwrap();
    assert_eq!(layer.get_layer_entities(EntityKind::Segment), vec![segment]);

    layer.set_autosplit(false).unwrap();
    point(&mut layer, 2.0, 0.0);
    assert_eq!(layer.get_layer_entities(EntityKind::Segment), vec![segment]);

    layer
        .add_object_with(Entity::point(7.0, 0.0).unwrap(), Some(true))
        .unwrap();
    assert_eq!(layer.get_layer_entities(EntityKind::Segment).len(), 2);
}

#[test]
fn locked_segments_are_not_split() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    layer.set_locked(segment, true).unwrap();

    point(&mut layer, 5.0, 0.0);
    assert_eq!(layer.get_layer_entities(EntityKind::Segment), vec![segment]);
}

#[test]
fn point_on_circle_turns_it_into_a_full_arc() {
    let mut layer = Layer::new("walls");
    let center = point(&mut layer, 0.0, 0.0);
    let circle = layer.add_object(Entity::circle(center, 5.0).unwrap()).unwrap();
    let circumference = total_length(&layer, EntityKind::Circle);

    point(&mut layer, 0.0, 5.0);

    assert!(!layer.has_object(circle));
    assert!(layer.get_layer_entities(EntityKind::Circle).is_empty());
    let arcs = layer.get_layer_entities(EntityKind::Arc);
    assert_eq!(arcs.len(), 1);
    match layer.entity_shape(arcs[0]) {
        Some(Shape::Arc {
            start_angle,
            end_angle,
            ..
        }) => {
            assert!((start_angle - 90.0).abs() < 1e-9);
            assert!((end_angle - 90.0).abs() < 1e-9);
        }
        other => panic!("expected an arc, got {other:?}"),
    }
    assert!((total_length(&layer, EntityKind::Arc) - circumference).abs() <= 1e-9);

    // 第二个点把整圆弧分成两段。
    point(&mut layer, 0.0, -5.0);
    assert_eq!(layer.get_layer_entities(EntityKind::Arc).len(), 2);
    assert!((total_length(&layer, EntityKind::Arc) - circumference).abs() <= 1e-9);
}

#[test]
fn point_inside_arc_splits_it_at_its_bearing() {
    let mut layer = Layer::new("walls");
    let center = point(&mut layer, 0.0, 0.0);
    let arc = layer
        .add_object(Entity::arc(center, 2.0, 0.0, 90.0).unwrap())
        .unwrap();
    let before = total_length(&layer, EntityKind::Arc);

    let at = point_at_degrees(Point2::new(0.0, 0.0), 2.0, 45.0);
    point(&mut layer, at.x(), at.y());

    assert!(!layer.has_object(arc));
    let arcs = layer.get_layer_entities(EntityKind::Arc);
    assert_eq!(arcs.len(), 2);
    assert!((total_length(&layer, EntityKind::Arc) - before).abs() <= TOLERANCE);

    // 弧外的点不分割。
    let outside = point_at_degrees(Point2::new(0.0, 0.0), 2.0, 180.0);
    point(&mut layer, outside.x(), outside.y());
    assert_eq!(layer.get_layer_entities(EntityKind::Arc), arcs);
}

#[test]
fn point_on_polyline_edge_splits_at_that_edge() {
    let mut layer = Layer::new("walls");
    let a = point(&mut layer, 0.0, 0.0);
    let b = point(&mut layer, 10.0, 0.0);
    let c = point(&mut layer, 10.0, 10.0);
    let polyline = layer
        .add_object(Entity::polyline(vec![a, b, c]).unwrap())
        .unwrap();

    let p = point(&mut layer, 10.0, 5.0);

    assert!(!layer.has_object(polyline));
    let pieces = layer.get_layer_entities(EntityKind::Polyline);
    assert_eq!(pieces.len(), 2);
    let mut vertex_lists: Vec<Vec<EntityId>> = pieces
        .iter()
        .map(|id| layer.get_object(*id).unwrap().geometry().references())
        .collect();
    vertex_lists.sort_by_key(Vec::len);
    assert_eq!(vertex_lists, vec![vec![p, c], vec![a, b, p]]);
    assert!((total_length(&layer, EntityKind::Polyline) - 20.0).abs() <= TOLERANCE);
}

#[test]
fn entities_with_users_are_not_split() {
    let mut layer = Layer::new("walls");
    let center = point(&mut layer, 0.0, 0.0);
    let circle = layer.add_object(Entity::circle(center, 5.0).unwrap()).unwrap();
    layer
        .add_object(Entity::radial_dimension(circle, false, Point2::new(8.0, 8.0)).unwrap())
        .unwrap();

    point(&mut layer, 5.0, 0.0);
    assert_eq!(layer.get_layer_entities(EntityKind::Circle), vec![circle]);
}

#[test]
fn undo_restores_the_original_segment() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let original = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    let middle = point(&mut layer, 5.0, 0.0);
    let pieces = layer.get_layer_entities(EntityKind::Segment);

    assert!(layer.undo().unwrap());
    assert_eq!(layer.get_layer_entities(EntityKind::Segment), vec![original]);
    assert!(!layer.has_object(middle));
    assert_eq!(layer.get_object(p1).unwrap().users().collect::<Vec<_>>(), vec![original]);

    assert!(layer.redo().unwrap());
    assert_eq!(layer.get_layer_entities(EntityKind::Segment), pieces);
    assert!(!layer.has_object(original));
    assert_eq!(layer.get_object(middle).unwrap().count_users(), 2);
}
