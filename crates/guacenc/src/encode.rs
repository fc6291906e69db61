//! Driving the encoder: read a recording, evaluate every instruction,
//! emit video.

use crate::display::Display;
use crate::error::EncodeError;
use crate::instructions::handle_instruction;
use crate::video::Video;
use guac_proto::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub width: i32,
    pub height: i32,
    pub bitrate: i32,
    /// Encode even if the recording is still advisory-locked by a writer.
    pub force: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            width: crate::video::VIDEO_DEFAULT_WIDTH,
            height: crate::video::VIDEO_DEFAULT_HEIGHT,
            bitrate: crate::video::VIDEO_DEFAULT_BITRATE,
            force: false,
        }
    }
}

/// Encodes one recording file into a video at `output`.
pub fn encode(input: &Path, output: &Path, options: &EncodeOptions) -> Result<(), EncodeError> {
    let file = File::open(input)?;

    // An exclusive advisory lock on the input marks a recording still in
    // progress; refuse it unless forced.
    if !options.force && !lock_shared(&file) {
        return Err(EncodeError::RecordingInProgress(input.to_path_buf()));
    }

    let video = Video::new(output, options.width, options.height, options.bitrate)?;
    let mut display = Display::new(Some(video));

    info!(
        target: "enc.encode",
        input = %input.display(),
        output = %output.display(),
        "encoding recording"
    );

    let mut reader = BufReader::new(file);
    let mut parser = Parser::new();
    while let Some(instruction) = parser.read_instruction(&mut reader)? {
        if let Err(e) = handle_instruction(&mut display, &instruction) {
            debug!(
                target: "enc.encode",
                opcode = %instruction.opcode,
                error = %e,
                "instruction handling failed"
            );
        }
    }

    display.finish()
}

#[cfg(unix)]
fn lock_shared(file: &File) -> bool {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
    rc == 0
}

#[cfg(not(unix))]
fn lock_shared(_file: &File) -> bool {
    true
}
