//! Video output: timeline management, aspect-preserving frame
//! preparation, and the encoder backend.
//!
//! The timeline is driven by recording timestamps: each sync advances the
//! output by however many fixed-rate frames elapsed, duplicating the
//! prepared frame to stay aligned with wall clock. Frames are prepared by
//! adding black letterboxes or pillarboxes in source coordinates, scaling
//! to the output size with a bicubic-family filter, and converting to
//! YUV 4:2:0 for the encoder.

use crate::buffer::Buffer;
use crate::error::EncodeError;
use crate::ivf::IvfWriter;
use fast_image_resize as fir;
use guac_proto::Timestamp;
use rav1e::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

/// Fixed output framerate, in frames per second.
pub const VIDEO_FRAMERATE: i64 = 25;

pub const VIDEO_DEFAULT_WIDTH: i32 = 640;
pub const VIDEO_DEFAULT_HEIGHT: i32 = 480;
pub const VIDEO_DEFAULT_BITRATE: i32 = 2_000_000;

/// One planar YUV 4:2:0 frame ready for encoding.
#[derive(Clone)]
pub struct YuvFrame {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

/// Encoder backend. The timeline engine feeds it fully-prepared frames.
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &YuvFrame) -> Result<(), EncodeError>;
    fn finish(&mut self) -> Result<(), EncodeError>;
}

pub struct Video {
    sink: Box<dyn VideoSink>,
    width: i32,
    height: i32,
    last_timestamp: Timestamp,
    /// The frame that will be flushed (possibly repeatedly) as the
    /// timeline advances.
    next_frame: Option<YuvFrame>,
    frames_written: u64,
    resizer: fir::Resizer,
}

impl Video {
    /// Opens an AV1-in-IVF video at `path`. The file must not already
    /// exist. Dimensions are rounded down to even values as required by
    /// 4:2:0 chroma subsampling.
    pub fn new(path: &Path, width: i32, height: i32, bitrate: i32) -> Result<Video, EncodeError> {
        let width = width & !1;
        let height = height & !1;
        let sink = Rav1eSink::new(path, width, height, bitrate)?;
        Ok(Self::with_sink(Box::new(sink), width, height))
    }

    /// Builds a video over an arbitrary sink; used directly by tests.
    pub fn with_sink(sink: Box<dyn VideoSink>, width: i32, height: i32) -> Video {
        Video {
            sink,
            width,
            height,
            last_timestamp: 0,
            next_frame: None,
            frames_written: 0,
            resizer: fir::Resizer::new(),
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Advances the timeline to `timestamp`, flushing the prepared frame
    /// once per elapsed frame interval. Less than one frame of elapsed
    /// time defers: the stored timestamp is left unchanged so the
    /// remainder accumulates.
    pub fn advance_timeline(&mut self, timestamp: Timestamp) -> Result<(), EncodeError> {
        if self.last_timestamp != 0 {
            let mut elapsed = (timestamp - self.last_timestamp) * VIDEO_FRAMERATE / 1000;
            if elapsed == 0 {
                return Ok(());
            }
            // Align the stored timestamp to the frame grid, not the raw
            // sync time, so rounding never drifts.
            let next_timestamp = self.last_timestamp + elapsed * 1000 / VIDEO_FRAMERATE;
            while elapsed > 0 {
                self.flush_frame()?;
                elapsed -= 1;
            }
            self.last_timestamp = next_timestamp;
        } else {
            self.last_timestamp = timestamp;
        }
        Ok(())
    }

    fn flush_frame(&mut self) -> Result<(), EncodeError> {
        if let Some(frame) = &self.next_frame {
            self.sink.write_frame(frame)?;
            self.frames_written += 1;
        }
        Ok(())
    }

    /// Converts a flattened buffer into the pending encoder frame, adding
    /// letterboxes or pillarboxes to preserve its aspect ratio. A buffer
    /// without pixels is a no-op.
    pub fn prepare_frame(&mut self, buffer: &Buffer) {
        let Some(surface) = buffer.surface() else {
            return;
        };
        let src_width = surface.width() as i32;
        let src_height = surface.height() as i32;
        if src_width == 0 || src_height == 0 {
            return;
        }

        let (letterbox, pillarbox) =
            margins(src_width, src_height, self.width, self.height);

        // Compose the margined canvas in source coordinates.
        let canvas_width = (src_width + 2 * pillarbox) as usize;
        let canvas_height = (src_height + 2 * letterbox) as usize;
        let mut canvas = vec![0u8; canvas_width * canvas_height * 4];
        let row_bytes = src_width as usize * 4;
        for row in 0..src_height as usize {
            let dst_offset =
                ((row + letterbox as usize) * canvas_width + pillarbox as usize) * 4;
            let src_offset = row * row_bytes;
            // Margins stay zeroed (opaque black after alpha is dropped).
            canvas[dst_offset..dst_offset + row_bytes]
                .copy_from_slice(&surface.data()[src_offset..src_offset + row_bytes]);
        }

        match self.scale_to_output(canvas, canvas_width, canvas_height) {
            Ok(frame) => self.next_frame = Some(frame),
            Err(e) => warn!(target: "enc.video", error = %e, "frame preparation failed; frame dropped"),
        }
    }

    fn scale_to_output(
        &mut self,
        canvas: Vec<u8>,
        canvas_width: usize,
        canvas_height: usize,
    ) -> Result<YuvFrame, EncodeError> {
        let src = fir::images::Image::from_vec_u8(
            canvas_width as u32,
            canvas_height as u32,
            canvas,
            fir::PixelType::U8x4,
        )
        .map_err(|e| EncodeError::Encoder(e.to_string()))?;
        let mut dst = fir::images::Image::new(
            self.width as u32,
            self.height as u32,
            fir::PixelType::U8x4,
        );
        let options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom))
            .use_alpha(false);
        self.resizer
            .resize(&src, &mut dst, &options)
            .map_err(|e| EncodeError::Encoder(e.to_string()))?;

        Ok(rgba_to_yuv420(
            dst.buffer(),
            self.width as usize,
            self.height as usize,
        ))
    }

    /// Flushes the pending frame one final time and drains the encoder.
    pub fn finish(&mut self) -> Result<(), EncodeError> {
        self.flush_frame()?;
        self.sink.finish()
    }
}

/// Margin sizes (letterbox, pillarbox) in source-buffer coordinates. When
/// height-based scaling fits the width, pillars pad the sides; otherwise
/// letterboxes pad top and bottom.
fn margins(src_width: i32, src_height: i32, dst_width: i32, dst_height: i32) -> (i32, i32) {
    let scaled_width = src_width * dst_height / src_height;
    if scaled_width <= dst_width {
        let pillarbox = (dst_width - scaled_width) * src_height / dst_height / 2;
        (0, pillarbox)
    } else {
        let scaled_height = src_height * dst_width / src_width;
        let letterbox = (dst_height - scaled_height) * src_width / dst_width / 2;
        (letterbox, 0)
    }
}

/// BT.601 limited-range conversion with 2x2 chroma averaging.
fn rgba_to_yuv420(rgba: &[u8], width: usize, height: usize) -> YuvFrame {
    let mut y_plane = vec![0u8; width * height];
    let chroma_width = width / 2;
    let chroma_height = height / 2;
    let mut u_plane = vec![0u8; chroma_width * chroma_height];
    let mut v_plane = vec![0u8; chroma_width * chroma_height];

    for row in 0..height {
        for col in 0..width {
            let offset = (row * width + col) * 4;
            let r = i32::from(rgba[offset]);
            let g = i32::from(rgba[offset + 1]);
            let b = i32::from(rgba[offset + 2]);
            y_plane[row * width + col] =
                (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;
        }
    }

    for row in 0..chroma_height {
        for col in 0..chroma_width {
            let mut r_sum = 0i32;
            let mut g_sum = 0i32;
            let mut b_sum = 0i32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let offset = ((row * 2 + dy) * width + col * 2 + dx) * 4;
                    r_sum += i32::from(rgba[offset]);
                    g_sum += i32::from(rgba[offset + 1]);
                    b_sum += i32::from(rgba[offset + 2]);
                }
            }
            let (r, g, b) = (r_sum / 4, g_sum / 4, b_sum / 4);
            u_plane[row * chroma_width + col] =
                (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            v_plane[row * chroma_width + col] =
                (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
        }
    }

    YuvFrame {
        width,
        height,
        y: y_plane,
        u: u_plane,
        v: v_plane,
    }
}

/// AV1 encoder writing an IVF container.
struct Rav1eSink {
    context: Context<u8>,
    ivf: IvfWriter<File>,
    pts: u64,
}

impl Rav1eSink {
    fn new(path: &Path, width: i32, height: i32, bitrate: i32) -> Result<Rav1eSink, EncodeError> {
        let file = File::create_new(path)?;
        let ivf = IvfWriter::new(
            file,
            *b"AV01",
            width as u16,
            height as u16,
            VIDEO_FRAMERATE as u32,
        )?;

        let mut encoder = EncoderConfig::with_speed_preset(10);
        encoder.width = width as usize;
        encoder.height = height as usize;
        encoder.time_base = Rational::new(1, VIDEO_FRAMERATE as u64);
        encoder.bitrate = bitrate;
        encoder.chroma_sampling = ChromaSampling::Cs420;
        encoder.low_latency = true;

        let config = Config::new().with_encoder_config(encoder);
        let context = config
            .new_context()
            .map_err(|e| EncodeError::Encoder(e.to_string()))?;

        Ok(Rav1eSink {
            context,
            ivf,
            pts: 0,
        })
    }

    fn drain(&mut self, flushing: bool) -> Result<(), EncodeError> {
        loop {
            match self.context.receive_packet() {
                Ok(packet) => {
                    self.ivf.write_frame(&packet.data, self.pts)?;
                    self.pts += 1;
                }
                Err(EncoderStatus::Encoded) => continue,
                Err(EncoderStatus::NeedMoreData) => return Ok(()),
                Err(EncoderStatus::LimitReached) => return Ok(()),
                Err(e) => {
                    if flushing {
                        debug!(target: "enc.video", status = ?e, "encoder drain stopped");
                        return Ok(());
                    }
                    return Err(EncodeError::Encoder(format!("{e:?}")));
                }
            }
        }
    }
}

impl VideoSink for Rav1eSink {
    fn write_frame(&mut self, frame: &YuvFrame) -> Result<(), EncodeError> {
        let mut encoded = self.context.new_frame();
        encoded.planes[0].copy_from_raw_u8(&frame.y, frame.width, 1);
        encoded.planes[1].copy_from_raw_u8(&frame.u, frame.width / 2, 1);
        encoded.planes[2].copy_from_raw_u8(&frame.v, frame.width / 2, 1);

        match self.context.send_frame(encoded) {
            Ok(()) => {}
            Err(EncoderStatus::EnoughData) => {
                // Drain and drop this frame; losing one duplicate is
                // preferable to stalling the replay.
                warn!(target: "enc.video", "encoder backlogged; frame dropped");
            }
            Err(e) => return Err(EncodeError::Encoder(format!("{e:?}"))),
        }
        self.drain(false)
    }

    fn finish(&mut self) -> Result<(), EncodeError> {
        self.context.flush();
        self.drain(true)?;
        self.ivf.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Rect;
    use guac_proto::CompositeMode;
    use std::sync::{Arc, Mutex};

    struct CountingSink(Arc<Mutex<Vec<YuvFrame>>>);

    impl VideoSink for CountingSink {
        fn write_frame(&mut self, frame: &YuvFrame) -> Result<(), EncodeError> {
            self.0.lock().unwrap().push(frame.clone());
            Ok(())
        }
        fn finish(&mut self) -> Result<(), EncodeError> {
            Ok(())
        }
    }

    fn video(width: i32, height: i32) -> (Video, Arc<Mutex<Vec<YuvFrame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let video = Video::with_sink(Box::new(CountingSink(Arc::clone(&frames))), width, height);
        (video, frames)
    }

    fn buffer_of(width: i32, height: i32, color: [u8; 4]) -> Buffer {
        let mut buffer = Buffer::new(false);
        buffer.resize(width, height).unwrap();
        buffer.set_path(Rect::new(0, 0, width, height));
        buffer.fill(color, CompositeMode::Over);
        buffer
    }

    #[test]
    fn timeline_matches_wallclock() {
        let (mut video, _frames) = video(640, 480);
        let buffer = buffer_of(640, 480, [255, 255, 255, 255]);
        video.prepare_frame(&buffer);

        video.advance_timeline(1000).unwrap();
        assert_eq!(video.frames_written(), 0, "first sync only sets the epoch");
        // Two seconds at 25 fps.
        video.advance_timeline(3000).unwrap();
        assert_eq!(video.frames_written(), 50);
    }

    #[test]
    fn sub_frame_interval_defers() {
        let (mut video, _frames) = video(640, 480);
        let buffer = buffer_of(640, 480, [255, 255, 255, 255]);
        video.prepare_frame(&buffer);

        video.advance_timeline(1000).unwrap();
        // 30 ms < one 40 ms frame: nothing flushed, timestamp unchanged.
        video.advance_timeline(1030).unwrap();
        assert_eq!(video.frames_written(), 0);
        // The deferred time still counts once enough accumulates.
        video.advance_timeline(1080).unwrap();
        assert_eq!(video.frames_written(), 2);
    }

    #[test]
    fn wide_input_gets_letterboxes() {
        // 1280x480 into 640x480: width-bound scaling leaves 640x240
        // content with 120-pixel bars top and bottom.
        let (mut video, frames) = video(640, 480);
        let buffer = buffer_of(1280, 480, [255, 255, 255, 255]);
        video.prepare_frame(&buffer);
        video.advance_timeline(1000).unwrap();
        video.advance_timeline(3000).unwrap();

        let frames = frames.lock().unwrap();
        let frame = frames.last().expect("at least one frame");
        let y = &frame.y;
        // Bar rows are black (limited-range Y=16); content rows are white.
        assert!(y[60 * 640 + 320] < 20, "top bar should be black");
        assert!(y[240 * 640 + 320] > 220, "content should be white");
        assert!(y[420 * 640 + 320] < 20, "bottom bar should be black");
    }

    #[test]
    fn tall_input_gets_pillarboxes() {
        let (mut video, frames) = video(640, 480);
        let buffer = buffer_of(320, 480, [255, 255, 255, 255]);
        video.prepare_frame(&buffer);
        video.advance_timeline(1000).unwrap();
        video.advance_timeline(3000).unwrap();

        let frames = frames.lock().unwrap();
        let frame = frames.last().expect("at least one frame");
        let y = &frame.y;
        assert!(y[240 * 640 + 40] < 20, "left bar should be black");
        assert!(y[240 * 640 + 320] > 220, "content should be white");
        assert!(y[240 * 640 + 600] < 20, "right bar should be black");
    }

    #[test]
    fn prepare_with_empty_buffer_is_noop() {
        let (mut video, _frames) = video(640, 480);
        video.prepare_frame(&Buffer::new(false));
        video.advance_timeline(1000).unwrap();
        video.advance_timeline(10_000).unwrap();
        assert_eq!(video.frames_written(), 0);
    }
}
