//! Full-loop test: a session records its broadcast output to disk, and
//! the encoder replays the file back into pixels.
//!
//! This drives the entire chain: terminal emulation, the delta engine and
//! glyph cache, the recording tee, the streaming parser, and the display
//! compositor.

use guac_client::client::{Client, NoopSessionHandler};
use guac_client::recording::{Recording, RecordingFlags};
use guac_terminal::{Terminal, PALETTE};
use guacenc::display::Display;
use guacenc::instructions::handle_instruction;
use std::sync::Arc;

#[test]
fn recorded_terminal_session_replays_to_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());

    // No viewers are connected; the tee still captures all output.
    let recording = Recording::create(
        &client,
        dir.path(),
        "session",
        false,
        RecordingFlags::OUTPUT,
    )
    .unwrap();

    // 64x24 cells over the 8x16 bitmap font.
    let term = Terminal::new(&client, 512, 384).unwrap();
    term.write("hi").unwrap();
    term.flush().unwrap();
    client.sync(1000).unwrap();
    recording.flush();

    // Replay the captured instruction stream.
    let bytes = std::fs::read(recording.path()).unwrap();
    let mut display = Display::new(None);
    let mut parser = guac_proto::Parser::new();
    let mut reader = std::io::Cursor::new(bytes);
    while let Some(instruction) = parser.read_instruction(&mut reader).unwrap() {
        handle_instruction(&mut display, &instruction).unwrap();
    }

    let layer = display.get_layer(0).unwrap();
    let frame = layer.frame.surface().unwrap();
    assert_eq!(frame.width(), 512);
    assert_eq!(frame.height(), 384);

    // The background cleared to palette black.
    assert_eq!(frame.pixel(500, 300), [0, 0, 0, 255]);

    // The first cell contains stroke pixels of 'h' in the default
    // foreground color.
    let fg = PALETTE[7];
    let expected = [fg.r, fg.g, fg.b, 255];
    let mut stroke_pixels = 0;
    for y in 0..16 {
        for x in 0..8 {
            if frame.pixel(x, y) == expected {
                stroke_pixels += 1;
            }
        }
    }
    assert!(stroke_pixels > 4, "glyph 'h' not rendered: {stroke_pixels}");

    // The second cell differs from the first (different glyph).
    let cell = |cx: usize| -> Vec<[u8; 4]> {
        (0..16)
            .flat_map(|y| (0..8).map(move |x| (cx * 8 + x, y)))
            .map(|(x, y)| frame.pixel(x, y))
            .collect()
    };
    assert_ne!(cell(0), cell(1));
}
