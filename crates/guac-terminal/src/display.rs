//! Glyph cache emission.
//!
//! Glyph rendering is turned into single `copy` instructions by maintaining
//! two wide offscreen buffers on the remote display: a *stroke* layer
//! holding each glyph in pure foreground color over transparency, and a
//! *filled* layer holding the same glyphs composited over their background.
//! Glyphs live at `(index * char_width, 0)` and are sent (as PNG) on first
//! use. Color changes retint the whole stroke layer with an ATOP fill and
//! rebuild the filled layer, amortizing per-cell color cost.

use crate::types::{Attributes, Color, PALETTE};
use guac_client::client::Client;
use guac_proto::protocol::{send_cfill, send_copy, send_rect, send_size};
use guac_proto::{CompositeMode, GuacSocket, ProtocolError, DEFAULT_LAYER};
use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use std::sync::Arc;

/// Produces a rasterized glyph image for transmission into the stroke
/// layer. Implementations draw the glyph in the given color over a fully
/// transparent background.
pub trait GlyphRasterizer: Send {
    fn cell_width(&self) -> usize;
    fn cell_height(&self) -> usize;
    fn rasterize(&self, c: char, color: Color) -> RgbaImage;
}

/// Rasterizer backed by the 8x8 public-domain bitmap font, rendered into
/// 8x16 cells by doubling rows.
pub struct BitmapFontRasterizer;

impl BitmapFontRasterizer {
    const WIDTH: usize = 8;
    const HEIGHT: usize = 16;

    fn bitmap(c: char) -> Option<[u8; 8]> {
        use font8x8::{
            UnicodeFonts, BASIC_FONTS, BLOCK_FONTS, BOX_FONTS, GREEK_FONTS, LATIN_FONTS,
        };
        BASIC_FONTS
            .get(c)
            .or_else(|| LATIN_FONTS.get(c))
            .or_else(|| GREEK_FONTS.get(c))
            .or_else(|| BOX_FONTS.get(c))
            .or_else(|| BLOCK_FONTS.get(c))
    }
}

impl GlyphRasterizer for BitmapFontRasterizer {
    fn cell_width(&self) -> usize {
        Self::WIDTH
    }

    fn cell_height(&self) -> usize {
        Self::HEIGHT
    }

    fn rasterize(&self, c: char, color: Color) -> RgbaImage {
        let mut image = RgbaImage::new(Self::WIDTH as u32, Self::HEIGHT as u32);
        let Some(bitmap) = Self::bitmap(c) else {
            return image;
        };
        let on = Rgba([color.r, color.g, color.b, 0xFF]);
        for (row, bits) in bitmap.iter().enumerate() {
            for col in 0..8 {
                if bits & (1 << col) != 0 {
                    image.put_pixel(col as u32, (row * 2) as u32, on);
                    image.put_pixel(col as u32, (row * 2 + 1) as u32, on);
                }
            }
        }
        image
    }
}

pub struct TerminalDisplay {
    client: Arc<Client>,
    /// Buffer holding glyphs in pure foreground color over transparency.
    glyph_stroke: i32,
    /// Buffer holding glyphs composited over their background color.
    filled_glyphs: i32,
    glyphs: HashMap<char, i32>,
    next_glyph: i32,
    glyph_foreground: u8,
    glyph_background: u8,
    rasterizer: Box<dyn GlyphRasterizer>,
    pub char_width: usize,
    pub char_height: usize,
}

impl TerminalDisplay {
    pub fn new(
        client: Arc<Client>,
        rasterizer: Box<dyn GlyphRasterizer>,
        foreground: u8,
        background: u8,
    ) -> TerminalDisplay {
        let char_width = rasterizer.cell_width();
        let char_height = rasterizer.cell_height();
        TerminalDisplay {
            glyph_stroke: client.alloc_buffer(),
            filled_glyphs: client.alloc_buffer(),
            client,
            glyphs: HashMap::new(),
            next_glyph: 0,
            glyph_foreground: foreground,
            glyph_background: background,
            rasterizer,
            char_width,
            char_height,
        }
    }

    fn socket(&self) -> Arc<dyn GuacSocket> {
        self.client.socket()
    }

    /// Announces the display size, in pixels, for the given cell grid.
    pub fn send_display_size(&self, columns: usize, rows: usize) -> Result<(), ProtocolError> {
        send_size(
            self.socket().as_ref(),
            DEFAULT_LAYER,
            (columns * self.char_width) as i32,
            (rows * self.char_height) as i32,
        )
    }

    /// Returns the glyph cache slot of `c`, rasterizing and sending the
    /// glyph first if absent. The slot is a character index; multiply by
    /// the char width for the pixel offset.
    fn glyph(&mut self, c: char) -> Result<i32, ProtocolError> {
        if let Some(&location) = self.glyphs.get(&c) {
            return Ok(location);
        }
        let location = self.next_glyph;
        self.next_glyph += 1;

        let color = PALETTE[usize::from(self.glyph_foreground)];
        let background = PALETTE[usize::from(self.glyph_background)];
        let image = self.rasterizer.rasterize(c, color);
        let socket = self.socket();
        let x = location * self.char_width as i32;

        // Upload the glyph as a PNG image stream into the stroke layer.
        self.client
            .stream_png(socket.as_ref(), CompositeMode::Over, self.glyph_stroke, x, 0, &image)?;

        // Mirror the glyph into the filled layer over its background.
        send_rect(
            socket.as_ref(),
            self.filled_glyphs,
            x,
            0,
            self.char_width as i32,
            self.char_height as i32,
        )?;
        send_cfill(
            socket.as_ref(),
            CompositeMode::Over,
            self.filled_glyphs,
            background.r,
            background.g,
            background.b,
            0xFF,
        )?;
        send_copy(
            socket.as_ref(),
            self.glyph_stroke,
            x,
            0,
            self.char_width as i32,
            self.char_height as i32,
            CompositeMode::Over,
            self.filled_glyphs,
            x,
            0,
        )?;

        self.glyphs.insert(c, location);
        Ok(location)
    }

    /// Adjusts the glyph cache coloring so subsequent copies out of the
    /// filled layer render with the given attributes.
    pub fn set_colors(&mut self, attributes: &Attributes) -> Result<(), ProtocolError> {
        let (foreground, background) = attributes.rendered();
        if foreground == self.glyph_foreground && background == self.glyph_background {
            return Ok(());
        }

        let socket = self.socket();
        let cache_width = self.next_glyph * self.char_width as i32;
        let fg = PALETTE[usize::from(foreground)];
        let bg = PALETTE[usize::from(background)];

        // Retint every stroke glyph in place.
        if foreground != self.glyph_foreground && cache_width > 0 {
            send_rect(
                socket.as_ref(),
                self.glyph_stroke,
                0,
                0,
                cache_width,
                self.char_height as i32,
            )?;
            send_cfill(
                socket.as_ref(),
                CompositeMode::Atop,
                self.glyph_stroke,
                fg.r,
                fg.g,
                fg.b,
                0xFF,
            )?;
        }

        // Rebuild the filled layer from background plus stroke.
        if cache_width > 0 {
            send_rect(
                socket.as_ref(),
                self.filled_glyphs,
                0,
                0,
                cache_width,
                self.char_height as i32,
            )?;
            send_cfill(
                socket.as_ref(),
                CompositeMode::Over,
                self.filled_glyphs,
                bg.r,
                bg.g,
                bg.b,
                0xFF,
            )?;
            send_copy(
                socket.as_ref(),
                self.glyph_stroke,
                0,
                0,
                cache_width,
                self.char_height as i32,
                CompositeMode::Over,
                self.filled_glyphs,
                0,
                0,
            )?;
        }

        self.glyph_foreground = foreground;
        self.glyph_background = background;
        Ok(())
    }

    /// Draws one glyph to the default layer via the filled cache.
    pub fn draw_glyph(&mut self, row: usize, col: usize, c: char) -> Result<(), ProtocolError> {
        let location = self.glyph(c)?;
        let socket = self.socket();
        send_copy(
            socket.as_ref(),
            self.filled_glyphs,
            location * self.char_width as i32,
            0,
            self.char_width as i32,
            self.char_height as i32,
            CompositeMode::Over,
            DEFAULT_LAYER,
            (col * self.char_width) as i32,
            (row * self.char_height) as i32,
        )
    }

    /// Fills a cell rectangle on the default layer with a palette color.
    pub fn fill_cells(
        &self,
        row: usize,
        col: usize,
        width: usize,
        height: usize,
        color_index: u8,
    ) -> Result<(), ProtocolError> {
        let socket = self.socket();
        let color = PALETTE[usize::from(color_index)];
        send_rect(
            socket.as_ref(),
            DEFAULT_LAYER,
            (col * self.char_width) as i32,
            (row * self.char_height) as i32,
            (width * self.char_width) as i32,
            (height * self.char_height) as i32,
        )?;
        send_cfill(
            socket.as_ref(),
            CompositeMode::Over,
            DEFAULT_LAYER,
            color.r,
            color.g,
            color.b,
            0xFF,
        )
    }

    /// Copies a cell rectangle within the default layer.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_cells(
        &self,
        src_row: usize,
        src_col: usize,
        width: usize,
        height: usize,
        dst_row: usize,
        dst_col: usize,
    ) -> Result<(), ProtocolError> {
        let socket = self.socket();
        send_copy(
            socket.as_ref(),
            DEFAULT_LAYER,
            (src_col * self.char_width) as i32,
            (src_row * self.char_height) as i32,
            (width * self.char_width) as i32,
            (height * self.char_height) as i32,
            CompositeMode::Over,
            DEFAULT_LAYER,
            (dst_col * self.char_width) as i32,
            (dst_row * self.char_height) as i32,
        )
    }

    pub fn flush(&self) -> Result<(), ProtocolError> {
        self.socket().flush()
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        self.client.free_buffer(self.glyph_stroke);
        self.client.free_buffer(self.filled_glyphs);
    }
}
