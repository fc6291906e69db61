//! Image buffers backing layers and offscreen surfaces.

use crate::error::EncodeError;
use crate::surface::{Rect, Surface};
use guac_proto::CompositeMode;

/// One drawing surface. Dimensions are tracked even while no pixel storage
/// exists (zero-sized buffers have no surface). A `rect` instruction leaves
/// a pending path here which the next `cfill` consumes.
#[derive(Default)]
pub struct Buffer {
    /// Whether the buffer grows automatically to contain any draw.
    pub autosize: bool,
    width: i32,
    height: i32,
    surface: Option<Surface>,
    pending_rect: Option<Rect>,
}

impl Buffer {
    pub fn new(autosize: bool) -> Buffer {
        Buffer {
            autosize,
            ..Buffer::default()
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut Surface> {
        self.surface.as_mut()
    }

    pub(crate) fn take_surface(&mut self) -> Option<Surface> {
        self.surface.take()
    }

    pub(crate) fn restore_surface(&mut self, surface: Option<Surface>) {
        self.surface = surface;
    }

    /// Resizes, preserving existing contents anchored top-left. A zero
    /// dimension drops the pixel storage entirely.
    pub fn resize(&mut self, width: i32, height: i32) -> Result<(), EncodeError> {
        if self.width == width && self.height == height {
            return Ok(());
        }
        if width <= 0 || height <= 0 {
            self.surface = None;
            self.width = width.max(0);
            self.height = height.max(0);
            return Ok(());
        }

        let mut surface = Surface::new(width, height)?;
        if let Some(old) = &self.surface {
            surface.blit(
                old,
                Rect::new(0, 0, old.width() as i32, old.height() as i32),
                0,
                0,
                CompositeMode::Src,
                255,
            );
        }
        self.surface = Some(surface);
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Grows the buffer so that the point `(x, y)` lies within it.
    pub fn fit(&mut self, x: i32, y: i32) -> Result<(), EncodeError> {
        let width = self.width.max(x + 1);
        let height = self.height.max(y + 1);
        if width != self.width || height != self.height {
            self.resize(width, height)?;
        }
        Ok(())
    }

    /// Replaces contents with an identical copy of `other` (frame reset).
    pub fn copy_contents(&mut self, other: &Buffer) -> Result<(), EncodeError> {
        self.resize(other.width, other.height)?;
        match (&other.surface, &mut self.surface) {
            (Some(src), Some(dst)) => {
                dst.blit(
                    src,
                    Rect::new(0, 0, src.width() as i32, src.height() as i32),
                    0,
                    0,
                    CompositeMode::Src,
                    255,
                );
            }
            (None, _) => self.surface = None,
            _ => {}
        }
        Ok(())
    }

    /// Records the path set by a `rect` instruction.
    pub fn set_path(&mut self, rect: Rect) {
        self.pending_rect = Some(rect);
    }

    /// Fills and consumes the pending path, if any.
    pub fn fill(&mut self, color: [u8; 4], mode: CompositeMode) {
        let Some(rect) = self.pending_rect.take() else {
            return;
        };
        if let Some(surface) = &mut self.surface {
            surface.fill_rect(rect, color, mode);
        }
    }

    /// Composites a rectangle of `src` into this buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        src: &Surface,
        src_rect: Rect,
        dst_x: i32,
        dst_y: i32,
        mode: CompositeMode,
    ) {
        if let Some(surface) = &mut self.surface {
            surface.blit(src, src_rect, dst_x, dst_y, mode, 255);
        }
    }
}
