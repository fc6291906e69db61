//! Terminal emulation core for the Guacamole gateway.
//!
//! A [`Terminal`] owns a character-cell grid, a scrollback ring, and a
//! delta engine that coalesces cell-level changes into rectangular `copy`,
//! `rect`/`cfill`, and glyph-cache draw instructions on the session's
//! broadcast socket. Backend drivers write output bytes in; user events
//! (resize, selection, scrollback paging) come in through dedicated
//! methods.

pub mod buffer;
pub mod delta;
pub mod display;
pub mod input;
pub mod scrollback;
pub mod terminal;
pub mod types;
mod vt;

pub use display::{BitmapFontRasterizer, GlyphRasterizer};
pub use scrollback::DEFAULT_SCROLLBACK_ROWS;
pub use terminal::Terminal;
pub use types::{Attributes, Cell, Color, DEFAULT_ATTRIBUTES, PALETTE};
