//! 命令行演示：画一段线，用一个点把它分成两段，再撤销和重做。

use std::cell::RefCell;
use std::rc::Rc;

use draftkit_config::AppConfig;
use draftkit_core::entity::{Entity, EntityKind};
use draftkit_engine::bus::{RedrawTracker, Subscription};
use draftkit_engine::drawing::Drawing;
use draftkit_engine::errors::LayerError;
use tracing::info;

pub fn run(config: &AppConfig) -> Result<(), LayerError> {
    let mut drawing = Drawing::from_config(config)?;
    let top = drawing.top_layer().id();
    let walls = drawing.new_layer(top, "walls")?;
    let layer = drawing
        .layer_mut(walls)
        .ok_or_else(|| LayerError::NotFound(format!("layer {walls}")))?;

    let tracker = Rc::new(RefCell::new(RedrawTracker::new()));
    layer.connect(Subscription::all(), Rc::clone(&tracker));

    let start = layer.add_object(Entity::point(0.0, 0.0)?)?;
    let end = layer.add_object(Entity::point(10.0, 0.0)?)?;
    layer.add_object(Entity::segment(start, end)?)?;
    layer.add_object(Entity::point(5.0, 0.0)?)?;
    info!(
        segments = layer.get_layer_entities(EntityKind::Segment).len(),
        points = layer.get_layer_entities(EntityKind::Point).len(),
        "放置中点后的线段"
    );

    layer.undo()?;
    info!(
        segments = layer.get_layer_entities(EntityKind::Segment).len(),
        "撤销后"
    );
    layer.redo()?;
    info!(
        segments = layer.get_layer_entities(EntityKind::Segment).len(),
        "重做后"
    );

    if let Some(bounds) = layer.get_boundary() {
        info!(
            xmin = bounds.xmin(),
            ymin = bounds.ymin(),
            xmax = bounds.xmax(),
            ymax = bounds.ymax(),
            "图层范围"
        );
    }
    if let Some(dirty) = tracker.borrow_mut().take_dirty() {
        info!(
            width = dirty.xmax() - dirty.xmin(),
            height = dirty.ymax() - dirty.ymin(),
            "待重绘区域"
        );
    }
    Ok(())
}
