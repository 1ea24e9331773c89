use draftkit_core::entity::{Entity, EntityId, EntityKind, LinearOrientation};
use draftkit_core::geometry::Point2;
use draftkit_core::style::{Attributes, Color};
use draftkit_core::values::EntityValues;
use draftkit_engine::drawing::Drawing;
use draftkit_engine::layer::Layer;

fn point(layer: &mut Layer, x: f64, y: f64) -> EntityId {
    layer.add_object(Entity::point(x, y).unwrap()).unwrap()
}

fn snapshot(layer: &Layer) -> Vec<EntityValues> {
    let mut values: Vec<EntityValues> = layer.entities().map(Entity::values).collect();
    values.sort_by_key(|v| v.id);
    values
}

fn populate(drawing: &mut Drawing) -> Layer {
    let red = drawing.intern_color(Color::new(255, 0, 0));
    let mut layer = Layer::new("plan");
    let p1 = point(&mut layer, 0.0, 0.0);
    let p2 = point(&mut layer, 10.0, 0.0);
    let p3 = point(&mut layer, 10.0, 10.0);
    let segment = layer.add_object(Entity::segment(p1, p2).unwrap()).unwrap();
    layer
        .set_attributes(
            segment,
            Attributes {
                style: Some(drawing.default_style()),
                color: Some(red),
                ..Attributes::default()
            },
        )
        .unwrap();
    let circle = layer.add_object(Entity::circle(p3, 2.0).unwrap()).unwrap();
    layer
        .add_object(Entity::arc(p1, 3.0, 30.0, 120.0).unwrap())
        .unwrap();
    layer.add_object(Entity::cline(p1, p3).unwrap()).unwrap();
    layer
        .add_object(Entity::polyline(vec![p1, p2, p3]).unwrap())
        .unwrap();
    layer
        .add_object(Entity::text(-5.0, 5.0, "door", 1.5, 90.0).unwrap())
        .unwrap();
    layer
        .add_object(
            Entity::linear_dimension(p1, p2, LinearOrientation::Horizontal, Point2::new(5.0, -2.0))
                .unwrap(),
        )
        .unwrap();
    layer
        .add_object(Entity::radial_dimension(circle, true, Point2::new(14.0, 14.0)).unwrap())
        .unwrap();
    layer.set_locked(circle, true).unwrap();
    layer.set_visibility(p3, false).unwrap();
    layer
}

#[test]
fn json_snapshots_rebuild_an_equal_layer() {
    let mut drawing = Drawing::default();
    let original = populate(&mut drawing);
    let values = snapshot(&original);

    let json = serde_json::to_string_pretty(&values).unwrap();
    let decoded: Vec<EntityValues> = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, values);

    // 快照按 id 升序，被引用的实体总是先于使用者加入。
    let mut rebuilt = Layer::new("copy");
    for entry in decoded {
        let entity = drawing.entity_from_values(entry).unwrap();
        rebuilt.add_object_with(entity, Some(false)).unwrap();
    }

    assert_eq!(snapshot(&rebuilt), values);
    assert_eq!(rebuilt.len(), original.len());
    for kind in EntityKind::ALL {
        assert_eq!(
            rebuilt.get_layer_entities(kind),
            original.get_layer_entities(kind),
            "{kind} index differs"
        );
    }
    for entity in original.entities() {
        let id = entity.id().unwrap();
        let copy = rebuilt.get_object(id).unwrap();
        let mut expected: Vec<EntityId> = entity.users().collect();
        let mut actual: Vec<EntityId> = copy.users().collect();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected, "users of {id}");
    }
}

#[test]
fn rebuilt_entities_are_found_by_geometry() {
    let mut drawing = Drawing::default();
    let original = populate(&mut drawing);
    let segment = original.get_layer_entities(EntityKind::Segment)[0];

    let mut values = original.get_object(segment).unwrap().values();
    values.id = None;
    let lookup = drawing.entity_from_values(values).unwrap();
    assert_eq!(original.find_object(&lookup), Some(segment));
}

#[test]
fn dangling_references_are_rejected_on_rebuild() {
    let mut drawing = Drawing::default();
    let original = populate(&mut drawing);
    let segment = original.get_layer_entities(EntityKind::Segment)[0];
    let values = original.get_object(segment).unwrap().values();

    let mut empty = Layer::new("empty");
    let entity = drawing.entity_from_values(values).unwrap();
    assert!(empty.add_object(entity).is_err());
    assert!(empty.is_empty());
}
