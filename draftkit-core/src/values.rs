//! 实体的值快照，供持久化层和撤销日志使用。
//!
//! 快照按值保存样式，重建时通过 `StyleTable` 重新去重共享。

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId, EntityKind, Geometry};
use crate::errors::GeometryError;
use crate::style::{Attributes, Color, Linetype, Style, StyleTable};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Style>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linetype: Option<Linetype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thickness: Option<f64>,
}

impl AttributeValues {
    pub fn from_attributes(attributes: &Attributes) -> Self {
        Self {
            style: attributes.style.as_deref().cloned(),
            color: attributes.color,
            linetype: attributes.linetype.as_deref().cloned(),
            thickness: attributes.thickness,
        }
    }

    pub fn into_attributes(self, styles: &mut StyleTable) -> Attributes {
        Attributes {
            style: self.style.map(|style| styles.intern_style(style)),
            color: self.color.map(|color| styles.intern_color(color)),
            linetype: self.linetype.map(|linetype| styles.intern_linetype(linetype)),
            thickness: self.thickness,
        }
    }
}

/// 一个实体的全部持久化值：类型标签、几何（含被引用实体的 id）、属性与标志。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityValues {
    pub id: Option<EntityId>,
    pub kind: EntityKind,
    pub geometry: Geometry,
    #[serde(default)]
    pub attributes: AttributeValues,
    pub visible: bool,
    pub locked: bool,
}

impl Entity {
    pub fn values(&self) -> EntityValues {
        EntityValues {
            id: self.id(),
            kind: self.kind(),
            geometry: self.geometry().clone(),
            attributes: AttributeValues::from_attributes(self.attributes()),
            visible: self.is_visible(),
            locked: self.is_locked(),
        }
    }

    /// 从快照重建实体，样式经 `styles` 去重后共享。
    pub fn from_values(values: EntityValues, styles: &mut StyleTable) -> Result<Self, GeometryError> {
        if values.kind != values.geometry.kind() {
            return Err(GeometryError::KindMismatch {
                tag: values.kind.name(),
                geometry: values.geometry.kind().name(),
            });
        }
        let attributes = values.attributes.into_attributes(styles);
        let mut entity = Entity::new(values.geometry)?.with_attributes(attributes)?;
        if let Some(id) = values.id {
            entity.assign_id(id);
        }
        entity.set_visible(values.visible);
        entity.set_locked(values.locked);
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn json_snapshot_rebuilds_an_equal_entity() {
        let mut styles = StyleTable::default();
        let dashed = styles.intern_linetype(Linetype::new("Dashed", vec![3.0, 1.0]).unwrap());
        let attributes = Attributes {
            style: Some(styles.default_style()),
            color: Some(Color::new(10, 20, 30)),
            linetype: Some(Rc::clone(&dashed)),
            thickness: Some(0.25),
        };
        let mut original = Entity::arc(EntityId::new(3), 4.0, 10.0, 200.0)
            .unwrap()
            .with_id(EntityId::new(11))
            .with_attributes(attributes)
            .unwrap();
        original.set_locked(true);

        let json = serde_json::to_string(&original.values()).unwrap();
        assert!(json.contains("\"type\":\"arc\""));
        let decoded: EntityValues = serde_json::from_str(&json).unwrap();
        let rebuilt = Entity::from_values(decoded, &mut styles).unwrap();

        assert_eq!(rebuilt, original);
        let shared = rebuilt.attributes().linetype.as_ref().unwrap();
        assert!(Rc::ptr_eq(shared, &dashed));
    }

    #[test]
    fn mismatched_tag_is_rejected() {
        let mut values = Entity::point(1.0, 1.0).unwrap().values();
        values.kind = EntityKind::Circle;
        let mut styles = StyleTable::default();
        assert_eq!(
            Entity::from_values(values, &mut styles).unwrap_err(),
            GeometryError::KindMismatch {
                tag: "circle",
                geometry: "point",
            }
        );
    }
}
