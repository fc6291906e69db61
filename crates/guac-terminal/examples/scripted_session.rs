//! Produces a session recording from a scripted terminal interaction.
//!
//! The resulting file is a raw Guacamole instruction stream; render it to
//! video with:
//!
//! ```text
//! cargo run -p guacenc -- scripted-session
//! ```

use guac_client::client::{Client, NoopSessionHandler};
use guac_client::recording::{Recording, RecordingFlags};
use guac_proto::current_timestamp;
use guac_terminal::Terminal;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let recording = Recording::create(
        &client,
        std::path::Path::new("."),
        "scripted-session",
        false,
        RecordingFlags::OUTPUT | RecordingFlags::KEYS,
    )?;

    let term = Terminal::new(&client, 640, 384)?;
    let mut timestamp = current_timestamp();

    let script: &[&str] = &[
        "$ uname -a\r\n",
        "Linux gateway 6.1.0 x86_64 GNU/Linux\r\n",
        "$ echo hello from a \x1b[1;32mrecorded\x1b[0m session\r\n",
        "hello from a recorded session\r\n",
        "$ ",
    ];

    for chunk in script {
        term.write(chunk)?;
        term.commit_cursor()?;
        term.flush()?;
        client.sync(timestamp)?;
        // Half a second of playback per chunk.
        timestamp += 500;
    }

    recording.flush();
    println!("wrote {}", recording.path().display());
    Ok(())
}
