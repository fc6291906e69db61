//! Headless replay of Guacamole session recordings into video.
//!
//! A recording is the raw instruction stream a session broadcast to its
//! users. Replay reconstructs a layered display by evaluating every
//! drawing instruction; each `sync` flattens the layer tree into the
//! default layer, advances the output timeline against the recorded
//! timestamps, and prepares a letterboxed, scaled frame for the encoder.

pub mod buffer;
pub mod display;
pub mod encode;
pub mod error;
pub mod image_stream;
pub mod instructions;
pub mod ivf;
pub mod layer;
pub mod surface;
pub mod video;

mod flatten;

pub use display::Display;
pub use encode::{encode, EncodeOptions};
pub use error::EncodeError;
pub use video::{Video, VideoSink, YuvFrame, VIDEO_FRAMERATE};
