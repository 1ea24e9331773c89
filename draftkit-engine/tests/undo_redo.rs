use draftkit_core::entity::{Entity, EntityId, EntityKind, LinearOrientation};
use draftkit_core::geometry::Point2;
use draftkit_core::style::{Attributes, Color};
use draftkit_core::values::EntityValues;
use draftkit_engine::errors::LayerError;
use draftkit_engine::events::{Endpoint, Origin};
use draftkit_engine::layer::Layer;

fn point(layer: &mut Layer, x: f64, y: f64) -> EntityId {
    layer.add_object(Entity::point(x, y).unwrap()).unwrap()
}

/// 图层内容的值快照，按 id 排序，便于整体比较。
fn snapshot(layer: &Layer) -> Vec<EntityValues> {
    let mut values: Vec<EntityValues> = layer.entities().map(Entity::values).collect();
    values.sort_by_key(|v| v.id);
    values
}

fn undo_all(layer: &mut Layer) -> usize {
    let mut steps = 0;
    while layer.undo().unwrap() {
        steps += 1;
    }
    steps
}

fn redo_all(layer: &mut Layer) -> usize {
    let mut steps = 0;
    while layer.redo().unwrap() {
        steps += 1;
    }
    steps
}

#[test]
fn moving_a_point_can_be_undone_and_redone() {
    let mut layer = Layer::new("walls");
    let p = point(&mut layer, 0.0, 0.0);
    layer.move_point(p, 3.0, 4.0).unwrap();

    assert!(layer.undo().unwrap());
    assert_eq!(layer.get_object(p).unwrap().location(), Some(Point2::new(0.0, 0.0)));
    assert!(layer.can_redo());

    assert!(layer.redo().unwrap());
    assert_eq!(layer.get_object(p).unwrap().location(), Some(Point2::new(3.0, 4.0)));
    assert!(!layer.can_redo());
}

#[test]
fn undo_keeps_the_index_in_sync() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    layer.move_point(p2, 10.0, 100.0).unwrap();
    assert!(layer.objs_in_region(9.0, 99.0, 11.0, 101.0, false).contains(&segment));

    layer.undo().unwrap();
    assert!(layer.objs_in_region(9.0, 99.0, 11.0, 101.0, false).is_empty());
    assert!(layer.objs_in_region(9.0, -1.0, 11.0, 1.0, false).contains(&segment));
}

#[test]
fn undo_then_redo_restores_the_final_state() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let p3 = point(&mut layer, 0.0, 10.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    let circle = layer.add_object(Entity::circle(p3, 2.0).unwrap()).unwrap();
    let arc = layer
        .add_object(Entity::arc(p3, 4.0, 0.0, 180.0).unwrap())
        .unwrap();
    let text = layer
        .add_object(Entity::text(20.0, 20.0, "A", 2.5, 0.0).unwrap())
        .unwrap();
    let dimension = layer
        .add_object(
            Entity::linear_dimension(p1, p2, LinearOrientation::Aligned, Point2::new(5.0, -3.0))
                .unwrap(),
        )
        .unwrap();

    layer.set_radius(circle, 3.0).unwrap();
    layer.set_start_angle(arc, -45.0).unwrap();
    layer.set_end_angle(arc, 200.0).unwrap();
    layer.set_endpoint(segment, Endpoint::Second, p3).unwrap();
    layer.set_text(text, "B").unwrap();
    layer.set_text_size(text, 5.0).unwrap();
    layer.set_text_location(text, 25.0, 25.0).unwrap();
    layer.set_dimension_location(dimension, 5.0, -6.0).unwrap();
    layer.set_visibility(circle, false).unwrap();
    layer
        .set_attributes(
            arc,
            Attributes {
                color: Some(Color::new(255, 0, 0)),
                thickness: Some(0.5),
                ..Attributes::default()
            },
        )
        .unwrap();
    layer.move_entity(segment, 1.0, 1.0).unwrap();
    layer.del_object(circle).unwrap();
    layer.set_name("renamed").unwrap();
    layer.set_scale(2.0).unwrap();

    let final_state = snapshot(&layer);
    let steps = undo_all(&mut layer);
    assert!(steps >= 14);
    assert_eq!(layer.name(), "walls");
    assert_eq!(layer.scale(), 1.0);
    assert!(layer.is_empty());

    assert_eq!(redo_all(&mut layer), steps);
    assert_eq!(snapshot(&layer), final_state);
    assert_eq!(layer.name(), "renamed");
    assert_eq!(layer.scale(), 2.0);
    assert!(layer.get_object(p3).unwrap().has_user(segment));
    assert!(!layer.get_object(p2).unwrap().has_user(segment));
    assert!(layer.get_object(p2).unwrap().has_user(dimension));
}

#[test]
fn cascaded_delete_is_one_undo_step() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    let before = snapshot(&layer);

    layer.del_object(p1).unwrap();
    assert!(layer.is_empty());

    assert!(layer.undo().unwrap());
    assert_eq!(snapshot(&layer), before);
    assert!(layer.get_object(p1).unwrap().has_user(segment));
    assert!(layer.get_object(p2).unwrap().has_user(segment));
    assert_eq!(layer.get_layer_entities(EntityKind::Segment), vec![segment]);
}

#[test]
fn grouped_actions_undo_together() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);

    layer.start_action();
    layer.move_point(p1, 1.0, 1.0).unwrap();
    layer.move_point(p2, 11.0, 1.0).unwrap();
    layer.end_action();

    assert!(layer.undo().unwrap());
    assert_eq!(layer.get_object(p1).unwrap().location(), Some(Point2::new(0.0, 0.0)));
    assert_eq!(layer.get_object(p2).unwrap().location(), Some(Point2::new(10.0, 0.0)));
}

#[test]
fn recording_a_change_clears_redo() {
    let mut layer = Layer::new("walls");
    let p = point(&mut layer, 0.0, 0.0);
    layer.move_point(p, 1.0, 0.0).unwrap();
    layer.undo().unwrap();
    assert!(layer.can_redo());

    layer.move_point(p, 2.0, 0.0).unwrap();
    assert!(!layer.can_redo());
    assert!(!layer.redo().unwrap());
}

#[test]
fn unchanged_values_record_nothing() {
    let mut layer = Layer::new("walls");
    let p = point(&mut layer, 1.0, 1.0);
    let depth = layer.undo_log().undo_depth();

    layer.move_point(p, 1.0, 1.0).unwrap();
    layer.set_visibility(p, true).unwrap();
    assert_eq!(layer.undo_log().undo_depth(), depth);
}

#[test]
fn lock_changes_are_undoable() {
    let mut layer = Layer::new("walls");
    let p = point(&mut layer, 0.0, 0.0);
    layer.move_point(p, 5.0, 5.0).unwrap();
    layer.set_locked(p, true).unwrap();

    let err = layer.move_point(p, 6.0, 6.0).unwrap_err();
    assert!(matches!(err, LayerError::Locked(id) if id == p));
    assert!(err.is_recoverable());

    layer.undo().unwrap();
    assert!(!layer.get_object(p).unwrap().is_locked());
    layer.undo().unwrap();
    assert_eq!(layer.get_object(p).unwrap().location(), Some(Point2::new(0.0, 0.0)));

    layer.redo().unwrap();
    layer.redo().unwrap();
    let restored = layer.get_object(p).unwrap();
    assert!(restored.is_locked());
    assert_eq!(restored.location(), Some(Point2::new(5.0, 5.0)));
}

#[test]
fn locked_endpoint_blocks_the_whole_translation() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    layer.set_locked(p2, true).unwrap();
    let depth = layer.undo_log().undo_depth();

    let err = layer.move_entity(segment, 1.0, 1.0).unwrap_err();
    assert!(matches!(err, LayerError::Locked(id) if id == p2));
    assert_eq!(layer.get_object(p1).unwrap().location(), Some(Point2::new(0.0, 0.0)));
    assert_eq!(layer.get_object(p2).unwrap().location(), Some(Point2::new(10.0, 0.0)));
    assert_eq!(layer.undo_log().undo_depth(), depth);
}

#[test]
fn failed_translation_is_rolled_back() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 1e308, 0.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    let depth = layer.undo_log().undo_depth();

    // 第一个端点移动成功，第二个端点溢出为无穷大。
    assert!(layer.move_entity(segment, 1e308, 0.0).is_err());
    assert_eq!(layer.get_object(p1).unwrap().location(), Some(Point2::new(0.0, 0.0)));
    assert_eq!(layer.get_object(p2).unwrap().location(), Some(Point2::new(1e308, 0.0)));
    assert_eq!(layer.undo_log().undo_depth(), depth);
    assert!(layer.objs_in_region(-1.0, -1.0, 1.0, 1.0, false).contains(&segment));
    assert!(layer.undo_log().log(Origin::Entity(p1)).unwrap().undo_entries().is_empty());
}

#[test]
fn failure_inside_a_group_keeps_earlier_steps() {
    let mut layer = Layer::new("walls");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 1e308, 0.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    let free = point(&mut layer, -5.0, -5.0);

    layer.start_action();
    layer.move_point(free, -6.0, -6.0).unwrap();
    assert!(layer.move_entity(segment, 1e308, 0.0).is_err());
    layer.end_action();

    assert_eq!(layer.get_object(free).unwrap().location(), Some(Point2::new(-6.0, -6.0)));
    assert_eq!(layer.get_object(p1).unwrap().location(), Some(Point2::new(0.0, 0.0)));
    assert!(layer.undo().unwrap());
    assert_eq!(layer.get_object(free).unwrap().location(), Some(Point2::new(-5.0, -5.0)));
    assert_eq!(layer.get_object(p1).unwrap().location(), Some(Point2::new(0.0, 0.0)));
}

#[test]
fn undo_log_survives_delete_and_reinsert() {
    let mut layer = Layer::new("walls");
    let p = point(&mut layer, 0.0, 0.0);
    layer.move_point(p, 2.0, 2.0).unwrap();
    layer.del_object(p).unwrap();
    assert!(layer.undo_log().is_detached(p));

    layer.undo().unwrap();
    assert!(layer.undo_log().is_attached(p));
    layer.undo().unwrap();
    assert_eq!(layer.get_object(p).unwrap().location(), Some(Point2::new(0.0, 0.0)));
}
