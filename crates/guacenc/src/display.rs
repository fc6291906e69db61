//! The reconstructed display: fixed-capacity collections of layers,
//! buffers, and image streams, plus the cursor and the video output.
//!
//! Indices arriving over the wire are validated against the fixed limits;
//! violations are logged warnings, never fatal. Layers allocate on first
//! reference; buffers likewise, always autosized.

use crate::buffer::Buffer;
use crate::error::EncodeError;
use crate::image_stream::ImageStream;
use crate::layer::{Layer, LAYER_NO_PARENT};
use crate::video::Video;
use guac_proto::Timestamp;
use tracing::warn;

pub const DISPLAY_MAX_LAYERS: usize = 64;
pub const DISPLAY_MAX_BUFFERS: usize = 4096;
pub const DISPLAY_MAX_STREAMS: usize = 64;

/// The mouse cursor: position, hotspot, and image.
pub struct Cursor {
    pub x: i32,
    pub y: i32,
    pub hotspot_x: i32,
    pub hotspot_y: i32,
    pub buffer: Buffer,
}

impl Cursor {
    fn new() -> Cursor {
        Cursor {
            // Not rendered until it first moves.
            x: -1,
            y: -1,
            hotspot_x: 0,
            hotspot_y: 0,
            buffer: Buffer::new(true),
        }
    }
}

pub struct Display {
    pub(crate) layers: Vec<Option<Layer>>,
    pub(crate) buffers: Vec<Option<Buffer>>,
    image_streams: Vec<Option<ImageStream>>,
    pub cursor: Cursor,
    pub last_sync: Timestamp,
    pub(crate) output: Option<Video>,
}

impl Display {
    pub fn new(output: Option<Video>) -> Display {
        let mut layers = Vec::with_capacity(DISPLAY_MAX_LAYERS);
        layers.resize_with(DISPLAY_MAX_LAYERS, || None);
        let mut buffers = Vec::with_capacity(DISPLAY_MAX_BUFFERS);
        buffers.resize_with(DISPLAY_MAX_BUFFERS, || None);
        let mut image_streams = Vec::with_capacity(DISPLAY_MAX_STREAMS);
        image_streams.resize_with(DISPLAY_MAX_STREAMS, || None);
        Display {
            layers,
            buffers,
            image_streams,
            cursor: Cursor::new(),
            last_sync: 0,
            output,
        }
    }

    /* Layers */

    /// Fetches a layer, allocating it on first reference. Out-of-range
    /// indices are protocol violations, reported and ignored.
    pub fn get_layer(&mut self, index: i32) -> Option<&mut Layer> {
        let slot = usize::try_from(index).ok().filter(|&i| i < DISPLAY_MAX_LAYERS);
        let Some(slot) = slot else {
            warn!(target: "enc.display", index, "layer index out of bounds");
            return None;
        };
        if self.layers[slot].is_none() {
            // The default layer is the root of the tree and has no parent.
            let parent = if slot == 0 { LAYER_NO_PARENT } else { 0 };
            self.layers[slot] = Some(Layer::new(parent));
        }
        self.layers[slot].as_mut()
    }

    pub fn free_layer(&mut self, index: i32) -> Result<(), EncodeError> {
        let slot = usize::try_from(index).ok().filter(|&i| i < DISPLAY_MAX_LAYERS);
        let Some(slot) = slot else {
            warn!(target: "enc.display", index, "layer index out of bounds");
            return Err(EncodeError::BadInstruction {
                opcode: "dispose",
                reason: "layer index out of bounds",
            });
        };
        self.layers[slot] = None;
        Ok(())
    }

    /// Depth of a layer within the tree: the default layer is 0, every
    /// child one more than its parent. Walks are bounded so a malicious
    /// parent cycle cannot hang the encoder.
    pub fn layer_depth(&self, slot: usize) -> usize {
        let mut depth = 0;
        let mut current = slot;
        while depth < DISPLAY_MAX_LAYERS {
            let Some(layer) = self.layers.get(current).and_then(Option::as_ref) else {
                break;
            };
            if layer.parent_index == LAYER_NO_PARENT {
                break;
            }
            let Ok(parent) = usize::try_from(layer.parent_index) else {
                break;
            };
            depth += 1;
            current = parent;
        }
        depth
    }

    /* Buffers */

    /// Fetches an offscreen buffer by its (negative) wire index,
    /// allocating an autosizing buffer on first reference.
    pub fn get_buffer(&mut self, index: i32) -> Option<&mut Buffer> {
        let Some(slot) = buffer_slot(index) else {
            warn!(target: "enc.display", index, "buffer index out of bounds");
            return None;
        };
        if self.buffers[slot].is_none() {
            self.buffers[slot] = Some(Buffer::new(true));
        }
        self.buffers[slot].as_mut()
    }

    pub fn free_buffer(&mut self, index: i32) -> Result<(), EncodeError> {
        let Some(slot) = buffer_slot(index) else {
            warn!(target: "enc.display", index, "buffer index out of bounds");
            return Err(EncodeError::BadInstruction {
                opcode: "dispose",
                reason: "buffer index out of bounds",
            });
        };
        self.buffers[slot] = None;
        Ok(())
    }

    /// Resolves a wire index to its drawing buffer: the underlying buffer
    /// of a layer for non-negative indices, the offscreen buffer otherwise.
    pub fn get_related_buffer(&mut self, index: i32) -> Option<&mut Buffer> {
        if index >= 0 {
            return self.get_layer(index).map(|layer| &mut layer.buffer);
        }
        self.get_buffer(index)
    }

    /* Image streams */

    pub fn create_image_stream(
        &mut self,
        index: i32,
        mask: i32,
        layer_index: i32,
        mimetype: &str,
        x: i32,
        y: i32,
    ) -> Result<(), EncodeError> {
        let Some(slot) = stream_slot(index) else {
            warn!(target: "enc.display", index, "stream index out of bounds");
            return Err(EncodeError::BadInstruction {
                opcode: "img",
                reason: "stream index out of bounds",
            });
        };
        // An existing stream at this index is simply replaced.
        self.image_streams[slot] = Some(ImageStream::new(mask, layer_index, mimetype, x, y));
        Ok(())
    }

    pub fn get_image_stream(&mut self, index: i32) -> Option<&mut ImageStream> {
        let Some(slot) = stream_slot(index) else {
            warn!(target: "enc.display", index, "stream index out of bounds");
            return None;
        };
        self.image_streams[slot].as_mut()
    }

    /// Removes and returns a stream for its `end` processing.
    pub fn take_image_stream(&mut self, index: i32) -> Option<ImageStream> {
        let slot = stream_slot(index)?;
        self.image_streams[slot].take()
    }

    /* Frame output */

    /// Handles a `sync`: flattens the display and hands the default
    /// layer's frame to the video timeline. Decreasing timestamps are
    /// rejected.
    pub fn sync(&mut self, timestamp: Timestamp) -> Result<(), EncodeError> {
        if timestamp < self.last_sync {
            warn!(target: "enc.display", timestamp, last_sync = self.last_sync, "decreasing sync timestamp");
            return Err(EncodeError::BadInstruction {
                opcode: "sync",
                reason: "decreasing timestamp",
            });
        }
        self.last_sync = timestamp;

        self.flatten()?;

        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        let result = (|| {
            output.advance_timeline(timestamp)?;
            // Allocation guarantees the default layer exists after flatten.
            if let Some(layer) = self.layers[0].as_ref() {
                output.prepare_frame(&layer.frame);
            }
            Ok(())
        })();
        self.output = Some(output);
        result
    }

    /// Finalizes the video output, draining the encoder.
    pub fn finish(&mut self) -> Result<(), EncodeError> {
        if let Some(mut output) = self.output.take() {
            output.finish()?;
        }
        Ok(())
    }
}

fn buffer_slot(index: i32) -> Option<usize> {
    usize::try_from(-index - 1)
        .ok()
        .filter(|&slot| slot < DISPLAY_MAX_BUFFERS)
}

fn stream_slot(index: i32) -> Option<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&slot| slot < DISPLAY_MAX_STREAMS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layer_has_no_parent() {
        let mut display = Display::new(None);
        assert_eq!(display.get_layer(0).unwrap().parent_index, LAYER_NO_PARENT);
        assert_eq!(display.get_layer(3).unwrap().parent_index, 0);
    }

    #[test]
    fn indices_validated_against_limits() {
        let mut display = Display::new(None);
        assert!(display.get_layer(64).is_none());
        assert!(display.get_layer(-1).is_none());
        assert!(display.get_buffer(0).is_none());
        assert!(display.get_buffer(-4097).is_none());
        assert!(display.get_buffer(-1).is_some());
        assert!(display.get_buffer(-4096).is_some());
    }

    #[test]
    fn related_buffer_resolves_both_namespaces() {
        let mut display = Display::new(None);
        display.get_layer(2).unwrap();
        assert!(display.get_related_buffer(2).is_some());
        assert!(display.get_related_buffer(-5).is_some());
    }

    #[test]
    fn depth_follows_parent_chain() {
        let mut display = Display::new(None);
        display.get_layer(0);
        display.get_layer(1).unwrap().parent_index = 0;
        display.get_layer(2).unwrap().parent_index = 1;
        assert_eq!(display.layer_depth(0), 0);
        assert_eq!(display.layer_depth(1), 1);
        assert_eq!(display.layer_depth(2), 2);
    }

    #[test]
    fn decreasing_sync_rejected() {
        let mut display = Display::new(None);
        display.sync(1000).unwrap();
        assert!(display.sync(500).is_err());
        assert_eq!(display.last_sync, 1000);
    }
}
