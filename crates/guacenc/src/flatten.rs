//! Flattening the layer tree into the default layer's frame.
//!
//! Per sync: every layer's frame is reset from its source buffer, layers
//! are composited deepest-first into their parents' frames (clipped to
//! their own bounds, scaled by opacity), and the cursor is painted last on
//! top of the default layer.

use crate::display::{Display, DISPLAY_MAX_LAYERS};
use crate::error::EncodeError;
use crate::layer::LAYER_NO_PARENT;
use crate::surface::Rect;
use guac_proto::CompositeMode;

impl Display {
    pub(crate) fn flatten(&mut self) -> Result<(), EncodeError> {
        // Render order: deepest first, siblings grouped by parent, then by
        // descending Z. Context is captured by the closure rather than
        // smuggled through a global.
        let mut order: Vec<usize> = (0..DISPLAY_MAX_LAYERS)
            .filter(|&slot| self.layers[slot].is_some())
            .collect();
        order.sort_by(|&a, &b| {
            let depth = self.layer_depth(b).cmp(&self.layer_depth(a));
            let layer_a = self.layers[a].as_ref();
            let layer_b = self.layers[b].as_ref();
            let parent_a = layer_a.map(|l| l.parent_index).unwrap_or(LAYER_NO_PARENT);
            let parent_b = layer_b.map(|l| l.parent_index).unwrap_or(LAYER_NO_PARENT);
            let z_a = layer_a.map(|l| l.z).unwrap_or(0);
            let z_b = layer_b.map(|l| l.z).unwrap_or(0);
            depth
                .then(parent_b.cmp(&parent_a))
                .then(z_b.cmp(&z_a))
        });

        // Reset every frame from its layer's source buffer.
        for &slot in &order {
            if let Some(layer) = self.layers[slot].as_mut() {
                let mut frame = std::mem::take(&mut layer.frame);
                frame.copy_contents(&layer.buffer)?;
                layer.frame = frame;
            }
        }

        // Composite children into parents, deepest first.
        for &slot in &order {
            let Some(layer) = self.layers[slot].as_ref() else {
                continue;
            };
            if layer.opacity == 0 || layer.parent_index == LAYER_NO_PARENT {
                continue;
            }
            let Ok(parent_slot) = usize::try_from(layer.parent_index) else {
                continue;
            };
            if parent_slot == slot || parent_slot >= DISPLAY_MAX_LAYERS {
                continue;
            }
            if self.layers[parent_slot].is_none() {
                continue;
            }

            let (x, y, opacity) = (layer.x, layer.y, layer.opacity);
            // Detach the child's frame surface so the parent slot can be
            // borrowed mutably.
            let Some(child_surface) = self.layers[slot]
                .as_mut()
                .and_then(|l| l.frame.take_surface())
            else {
                continue;
            };

            if let Some(parent) = self.layers[parent_slot].as_mut() {
                if let Some(dst) = parent.frame.surface_mut() {
                    dst.blit(
                        &child_surface,
                        Rect::new(0, 0, child_surface.width() as i32, child_surface.height() as i32),
                        x,
                        y,
                        CompositeMode::Over,
                        opacity,
                    );
                }
            }

            if let Some(layer) = self.layers[slot].as_mut() {
                layer.frame.restore_surface(Some(child_surface));
            }
        }

        self.render_cursor();
        Ok(())
    }

    /// Paints the cursor image over the default layer's frame, offset by
    /// its hotspot. Suppressed while the position is negative.
    fn render_cursor(&mut self) {
        if self.cursor.x < 0 || self.cursor.y < 0 {
            return;
        }
        let Some(src) = self.cursor.buffer.surface() else {
            return;
        };
        let x = self.cursor.x - self.cursor.hotspot_x;
        let y = self.cursor.y - self.cursor.hotspot_y;
        if let Some(default_layer) = self.layers[0].as_mut() {
            if let Some(dst) = default_layer.frame.surface_mut() {
                dst.blit(
                    src,
                    Rect::new(0, 0, src.width() as i32, src.height() as i32),
                    x,
                    y,
                    CompositeMode::Over,
                    255,
                );
            }
        }
    }
}
