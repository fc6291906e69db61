//! Inbound image streams and decoder dispatch.
//!
//! An `img` instruction opens a stream whose mimetype selects a decoder;
//! blobs accumulate raw bytes until `end`, at which point the image is
//! decoded and drawn to the destination buffer. Streams with unknown
//! mimetypes still accumulate (and discard) their data so the instruction
//! stream stays in sync.

use crate::buffer::Buffer;
use crate::error::EncodeError;
use crate::surface::{Rect, Surface};
use guac_proto::CompositeMode;
use image::ImageFormat;
use tracing::warn;

/// Initial allocation for the accumulation buffer.
pub const IMAGE_STREAM_INITIAL_LENGTH: usize = 4096;

/// Hard cap on a single image stream, guarding the doubling growth.
pub const IMAGE_STREAM_MAX_LENGTH: usize = 64 * 1024 * 1024;

/// Decoder table: mimetype to image format.
fn decoder_for(mimetype: &str) -> Option<ImageFormat> {
    match mimetype {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" => Some(ImageFormat::Jpeg),
        "image/webp" => Some(ImageFormat::WebP),
        other => {
            warn!(target: "enc.stream", mimetype = %other, "no decoder for mimetype");
            None
        }
    }
}

pub struct ImageStream {
    /// Destination layer or buffer index.
    pub layer_index: i32,
    pub mask: i32,
    pub x: i32,
    pub y: i32,
    format: Option<ImageFormat>,
    data: Vec<u8>,
    max_length: usize,
}

impl ImageStream {
    pub fn new(mask: i32, layer_index: i32, mimetype: &str, x: i32, y: i32) -> ImageStream {
        ImageStream {
            layer_index,
            mask,
            x,
            y,
            format: decoder_for(mimetype),
            data: Vec::with_capacity(IMAGE_STREAM_INITIAL_LENGTH),
            max_length: IMAGE_STREAM_INITIAL_LENGTH,
        }
    }

    /// Appends a decoded blob, growing by doubling with overflow-checked
    /// arithmetic. Oversized streams fail the operation, not the process.
    pub fn receive(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        let needed = self
            .data
            .len()
            .checked_add(data.len())
            .ok_or(EncodeError::BadInstruction {
                opcode: "blob",
                reason: "image stream length overflow",
            })?;
        while self.max_length < needed {
            self.max_length = self
                .max_length
                .checked_mul(2)
                .filter(|&len| len <= IMAGE_STREAM_MAX_LENGTH)
                .ok_or(EncodeError::BadInstruction {
                    opcode: "blob",
                    reason: "image stream too large",
                })?;
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    /// Ends the stream, decoding and drawing to the destination buffer.
    /// Having no decoder is success (the image is simply not rendered);
    /// a decode failure is logged and likewise non-fatal.
    pub fn end(&mut self, buffer: &mut Buffer) -> Result<(), EncodeError> {
        let Some(format) = self.format else {
            return Ok(());
        };

        let decoded = match image::load_from_memory_with_format(&self.data, format) {
            Ok(decoded) => decoded.to_rgba8(),
            Err(e) => {
                warn!(target: "enc.stream", error = %e, "image decode failed; not rendered");
                return Ok(());
            }
        };

        let width = decoded.width() as i32;
        let height = decoded.height() as i32;
        let mut surface = Surface::new(width, height)?;
        premultiply_into(&decoded, &mut surface);

        if buffer.autosize {
            buffer.fit(self.x + width, self.y + height)?;
        }
        let mode = CompositeMode::from_mask(self.mask).unwrap_or_default();
        buffer.draw(
            &surface,
            Rect::new(0, 0, width, height),
            self.x,
            self.y,
            mode,
        );
        Ok(())
    }
}

/// Converts straight-alpha image rows to the premultiplied form used by
/// surfaces.
fn premultiply_into(decoded: &image::RgbaImage, surface: &mut Surface) {
    for (x, y, pixel) in decoded.enumerate_pixels() {
        let alpha = u32::from(pixel[3]);
        let premultiplied = [
            (u32::from(pixel[0]) * alpha / 255) as u8,
            (u32::from(pixel[1]) * alpha / 255) as u8,
            (u32::from(pixel[2]) * alpha / 255) as u8,
            pixel[3],
        ];
        surface.write_pixel(x as usize, y as usize, premultiplied);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageEncoder, RgbaImage};

    fn png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba(color));
        let mut out = Vec::new();
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
            .unwrap();
        out
    }

    #[test]
    fn png_stream_draws_to_autosized_buffer() {
        let mut stream = ImageStream::new(0xE, -1, "image/png", 10, 20);
        stream.receive(&png_bytes(4, 2, [0, 128, 255, 255])).unwrap();

        let mut buffer = Buffer::new(true);
        stream.end(&mut buffer).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (14, 22));
        let surface = buffer.surface().unwrap();
        assert_eq!(surface.pixel(10, 20), [0, 128, 255, 255]);
        assert_eq!(surface.pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn unknown_mimetype_accumulates_and_ends_ok() {
        let mut stream = ImageStream::new(0xE, 0, "image/tiff", 0, 0);
        stream.receive(b"garbage").unwrap();
        let mut buffer = Buffer::new(false);
        stream.end(&mut buffer).unwrap();
        assert!(buffer.surface().is_none());
    }

    #[test]
    fn corrupt_image_is_logged_not_fatal() {
        let mut stream = ImageStream::new(0xE, 0, "image/png", 0, 0);
        stream.receive(b"not a png").unwrap();
        let mut buffer = Buffer::new(true);
        assert!(stream.end(&mut buffer).is_ok());
    }
}
