//! Replay pipeline tests: instruction streams in, flattened frames out.

use guac_proto::protocol::{
    send_cfill, send_copy, send_dispose, send_img, send_mouse, send_rect, send_size, send_sync,
};
use guac_proto::socket::{BufferedSocket, GuacSocket};
use guac_proto::{CompositeMode, Parser};
use guacenc::display::Display;
use guacenc::encode::{encode, EncodeOptions};
use guacenc::instructions::handle_instruction;
use guacenc::video::{Video, VideoSink, YuvFrame};
use guacenc::EncodeError;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct CountingSink(Arc<Mutex<u64>>);

impl VideoSink for CountingSink {
    fn write_frame(&mut self, _frame: &YuvFrame) -> Result<(), EncodeError> {
        *self.0.lock().unwrap() += 1;
        Ok(())
    }
    fn finish(&mut self) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// Builds a recording byte stream with the protocol senders.
fn record(f: impl FnOnce(&dyn GuacSocket)) -> Vec<u8> {
    let sink = Sink::default();
    let socket = BufferedSocket::new(sink.clone());
    f(&socket);
    socket.flush().unwrap();
    let bytes = sink.0.lock().unwrap().clone();
    bytes
}

fn replay(display: &mut Display, bytes: &[u8]) {
    let mut parser = Parser::new();
    let mut reader = std::io::Cursor::new(bytes.to_vec());
    while let Some(instruction) = parser.read_instruction(&mut reader).unwrap() {
        let _ = handle_instruction(display, &instruction);
    }
}

#[test]
fn draw_and_sync_produces_timed_frames() {
    let frames = Arc::new(Mutex::new(0u64));
    let video = Video::with_sink(Box::new(CountingSink(Arc::clone(&frames))), 64, 48);
    let mut display = Display::new(Some(video));

    let bytes = record(|socket| {
        send_size(socket, 0, 64, 48).unwrap();
        send_rect(socket, 0, 0, 0, 64, 48).unwrap();
        send_cfill(socket, CompositeMode::Over, 0, 200, 10, 10, 255).unwrap();
        send_sync(socket, 1000).unwrap();
        send_sync(socket, 2000).unwrap();
    });
    replay(&mut display, &bytes);

    // One second elapsed at 25 fps.
    assert_eq!(*frames.lock().unwrap(), 25);
    let layer = display.get_layer(0).unwrap();
    let frame = layer.frame.surface().unwrap();
    assert_eq!(frame.pixel(10, 10), [200, 10, 10, 255]);
}

#[test]
fn png_stream_renders_into_layer() {
    let mut display = Display::new(None);

    // Encode a 4x4 green PNG and stream it at (2, 2) on layer 0.
    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 255, 0, 255]));
    let mut png = Vec::new();
    image::ImageEncoder::write_image(
        image::codecs::png::PngEncoder::new(&mut png),
        image.as_raw(),
        4,
        4,
        image::ExtendedColorType::Rgba8,
    )
    .unwrap();

    let bytes = record(|socket| {
        send_size(socket, 0, 16, 16).unwrap();
        send_img(socket, 1, CompositeMode::Over, 0, "image/png", 2, 2).unwrap();
        guac_proto::protocol::send_blob(socket, 1, &png).unwrap();
        guac_proto::protocol::send_end(socket, 1).unwrap();
        send_sync(socket, 1).unwrap();
    });
    replay(&mut display, &bytes);

    let layer = display.get_layer(0).unwrap();
    let frame = layer.frame.surface().unwrap();
    assert_eq!(frame.pixel(3, 3), [0, 255, 0, 255]);
    assert_eq!(frame.pixel(10, 10), [0, 0, 0, 0]);
}

#[test]
fn copy_between_buffer_and_layer() {
    let mut display = Display::new(None);
    let bytes = record(|socket| {
        send_size(socket, 0, 8, 8).unwrap();
        // Draw into offscreen buffer -1, which autosizes.
        send_rect(socket, -1, 0, 0, 4, 4).unwrap();
        send_cfill(socket, CompositeMode::Over, -1, 255, 255, 0, 255).unwrap();
        send_copy(socket, -1, 0, 0, 4, 4, CompositeMode::Over, 0, 4, 4).unwrap();
        send_sync(socket, 1).unwrap();
    });
    replay(&mut display, &bytes);

    let layer = display.get_layer(0).unwrap();
    let frame = layer.frame.surface().unwrap();
    assert_eq!(frame.pixel(5, 5), [255, 255, 0, 255]);
    assert_eq!(frame.pixel(1, 1), [0, 0, 0, 0]);
}

#[test]
fn mouse_with_timestamp_advances_timeline() {
    let frames = Arc::new(Mutex::new(0u64));
    let video = Video::with_sink(Box::new(CountingSink(Arc::clone(&frames))), 64, 48);
    let mut display = Display::new(Some(video));

    let bytes = record(|socket| {
        send_size(socket, 0, 64, 48).unwrap();
        send_rect(socket, 0, 0, 0, 64, 48).unwrap();
        send_cfill(socket, CompositeMode::Over, 0, 1, 2, 3, 255).unwrap();
        send_sync(socket, 1000).unwrap();
        send_mouse(socket, 5, 5, 0, 1400).unwrap();
    });
    replay(&mut display, &bytes);

    assert_eq!(*frames.lock().unwrap(), 10);
    assert_eq!(display.cursor.x, 5);
}

#[test]
fn dispose_of_default_layer_refused() {
    let mut display = Display::new(None);
    let bytes = record(|socket| {
        send_size(socket, 0, 8, 8).unwrap();
        send_dispose(socket, 0).unwrap();
        send_sync(socket, 1).unwrap();
    });
    replay(&mut display, &bytes);
    // The default layer survives and still flattens.
    assert!(display.get_layer(0).unwrap().frame.surface().is_some());
}

#[test]
fn refuses_locked_recording_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("session");
    std::fs::write(&input, b"4.sync,1.0;").unwrap();

    // Hold the writer's exclusive lock, as a live session would.
    let held = std::fs::File::open(&input).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        assert_eq!(
            unsafe { libc::flock(held.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) },
            0
        );

        let output = dir.path().join("session.ivf");
        let result = encode(&input, &output, &EncodeOptions::default());
        assert!(matches!(result, Err(EncodeError::RecordingInProgress(_))));
        assert!(!output.exists());
    }
    drop(held);
}

#[test]
fn force_encodes_despite_lock() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("session");
    let bytes = record(|socket| {
        send_size(socket, 0, 64, 48).unwrap();
        send_rect(socket, 0, 0, 0, 64, 48).unwrap();
        send_cfill(socket, CompositeMode::Over, 0, 255, 0, 0, 255).unwrap();
        send_sync(socket, 1000).unwrap();
        send_sync(socket, 1080).unwrap();
    });
    std::fs::write(&input, &bytes).unwrap();

    let output = dir.path().join("session.ivf");
    let options = EncodeOptions {
        width: 64,
        height: 48,
        bitrate: 200_000,
        force: true,
    };
    encode(&input, &output, &options).unwrap();

    let encoded = std::fs::read(&output).unwrap();
    assert_eq!(&encoded[0..4], b"DKIF");
    assert_eq!(&encoded[8..12], b"AV01");
    // Two frames (80 ms at 25 fps) were written into the container.
    assert_eq!(u32::from_le_bytes([encoded[24], encoded[25], encoded[26], encoded[27]]), 2);
}
