//! 图纸：样式表、图层树与配置的容器。

use std::rc::Rc;

use draftkit_config::{AppConfig, StyleConfig};
use draftkit_core::entity::Entity;
use draftkit_core::style::{Color, Linetype, Style, StyleTable};
use draftkit_core::values::EntityValues;
use tracing::debug;

use crate::errors::LayerError;
use crate::layer::{Layer, LayerId, LayerSettings};

const TOP_LAYER_NAME: &str = "top";

/// 一张图纸。顶层图层之下可以嵌套任意层子图层，新图层沿用图纸的设置。
#[derive(Debug)]
pub struct Drawing {
    styles: StyleTable,
    top: Layer,
    settings: LayerSettings,
}

impl Default for Drawing {
    fn default() -> Self {
        Self::new(Style::default(), LayerSettings::default())
    }
}

impl Drawing {
    pub fn new(default_style: Style, settings: LayerSettings) -> Self {
        Self {
            styles: StyleTable::new(default_style),
            top: Layer::with_settings(TOP_LAYER_NAME, settings.clone()),
            settings,
        }
    }

    /// 按配置构造图纸，默认样式来自 `[drawing.default_style]`。
    pub fn from_config(config: &AppConfig) -> Result<Self, LayerError> {
        let style = style_from_config(&config.drawing.default_style)?;
        let settings = LayerSettings::from_config(config);
        debug!(
            style = style.name(),
            autosplit = settings.autosplit,
            "drawing created from config"
        );
        Ok(Self::new(style, settings))
    }

    #[inline]
    pub fn styles(&self) -> &StyleTable {
        &self.styles
    }

    #[inline]
    pub fn styles_mut(&mut self) -> &mut StyleTable {
        &mut self.styles
    }

    #[inline]
    pub fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    pub fn default_style(&self) -> Rc<Style> {
        self.styles.default_style()
    }

    pub fn intern_style(&mut self, style: Style) -> Rc<Style> {
        self.styles.intern_style(style)
    }

    pub fn intern_color(&mut self, color: Color) -> Color {
        self.styles.intern_color(color)
    }

    pub fn intern_linetype(&mut self, linetype: Linetype) -> Rc<Linetype> {
        self.styles.intern_linetype(linetype)
    }

    #[inline]
    pub fn top_layer(&self) -> &Layer {
        &self.top
    }

    #[inline]
    pub fn top_layer_mut(&mut self) -> &mut Layer {
        &mut self.top
    }

    /// 在 `parent` 之下新建子图层。
    pub fn new_layer(&mut self, parent: LayerId, name: &str) -> Result<LayerId, LayerError> {
        let layer = Layer::with_settings(name, self.settings.clone());
        self.top
            .find_layer_mut(parent)
            .ok_or_else(|| LayerError::NotFound(format!("layer {parent}")))?
            .add_sublayer(layer)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.top.find_layer(id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.top.find_layer_mut(id)
    }

    /// 从顶层图层开始按名称逐级查找；空路径返回顶层图层。
    pub fn layer_by_path(&self, path: &[&str]) -> Option<&Layer> {
        path.iter().try_fold(&self.top, |layer, name| {
            layer.sublayers().find(|child| child.name() == *name)
        })
    }

    /// 从值快照重建实体，样式经本图纸的样式表去重。
    pub fn entity_from_values(&mut self, values: EntityValues) -> Result<Entity, LayerError> {
        Ok(Entity::from_values(values, &mut self.styles)?)
    }
}

fn style_from_config(config: &StyleConfig) -> Result<Style, LayerError> {
    let [r, g, b] = config.color;
    let linetype = if config.dashes.is_empty() {
        Linetype::solid()
    } else {
        Linetype::new(config.linetype.clone(), config.dashes.clone())?
    };
    Ok(Style::new(
        config.name.clone(),
        linetype,
        Color::new(r, g, b),
        config.thickness,
    )?)
}

#[cfg(test)]
mod tests {
    use draftkit_core::entity::EntityKind;

    use super::*;

    #[test]
    fn from_config_uses_configured_style() {
        let mut config = AppConfig::default();
        config.drawing.default_style.name = "Thin".to_string();
        config.drawing.default_style.color = [255, 0, 0];
        config.drawing.default_style.dashes = vec![2.0, 1.0];
        config.drawing.autosplit = false;

        let drawing = Drawing::from_config(&config).unwrap();
        let style = drawing.default_style();
        assert_eq!(style.name(), "Thin");
        assert_eq!(style.color(), Color::new(255, 0, 0));
        assert_eq!(style.linetype().dashes(), &[2.0, 1.0]);
        assert!(!drawing.top_layer().autosplit());
    }

    #[test]
    fn odd_dash_pattern_is_rejected() {
        let mut config = AppConfig::default();
        config.drawing.default_style.dashes = vec![1.0];
        assert!(matches!(
            Drawing::from_config(&config),
            Err(LayerError::Geometry(_))
        ));
    }

    #[test]
    fn layers_are_found_by_path() {
        let mut drawing = Drawing::default();
        let top = drawing.top_layer().id();
        let walls = drawing.new_layer(top, "walls").unwrap();
        let doors = drawing.new_layer(walls, "doors").unwrap();

        assert_eq!(drawing.layer_by_path(&[]).map(Layer::id), Some(top));
        assert_eq!(
            drawing.layer_by_path(&["walls", "doors"]).map(Layer::id),
            Some(doors)
        );
        assert!(drawing.layer_by_path(&["doors"]).is_none());
        assert_eq!(drawing.layer(doors).and_then(Layer::parent), Some(walls));

        let layer = drawing.layer_mut(doors).unwrap();
        let id = layer.add_object(Entity::point(1.0, 1.0).unwrap()).unwrap();
        assert_eq!(layer.get_layer_entities(EntityKind::Point), vec![id]);
    }

    #[test]
    fn snapshots_share_interned_styles() {
        let mut drawing = Drawing::default();
        let mut layer = Layer::new("scratch");
        let id = layer.add_object(Entity::point(0.0, 0.0).unwrap()).unwrap();
        let mut values = layer.get_object(id).unwrap().values();
        values.attributes.style = Some(Style::default());

        let first = drawing.entity_from_values(values.clone()).unwrap();
        let second = drawing.entity_from_values(values).unwrap();
        let (Some(a), Some(b)) = (&first.attributes().style, &second.attributes().style) else {
            panic!("style was dropped");
        };
        assert!(Rc::ptr_eq(a, b));
    }
}
