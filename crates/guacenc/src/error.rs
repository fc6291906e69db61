//! Error type for the encoding pipeline.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("protocol error: {0}")]
    Protocol(#[from] guac_proto::ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("video encoder failed: {0}")]
    Encoder(String),

    #[error("refusing to encode in-progress recording \"{0}\" (use -f to override)")]
    RecordingInProgress(PathBuf),

    #[error("malformed \"{opcode}\" instruction: {reason}")]
    BadInstruction {
        opcode: &'static str,
        reason: &'static str,
    },

    #[error("surface allocation overflow ({width}x{height})")]
    SurfaceTooLarge { width: i32, height: i32 },
}
