//! Error type shared by the codec and socket layers.

use crate::status::Status;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Transport-level failure on the underlying byte stream.
    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The inbound byte stream violated the instruction grammar.
    #[error("malformed instruction: {0}")]
    BadRequest(&'static str),

    /// A single instruction exceeded the configured size cap.
    #[error("instruction exceeds {limit} bytes")]
    Overrun { limit: usize },

    /// The socket has been closed; no further writes are possible.
    #[error("socket closed")]
    Closed,

    /// The operation is not supported by this socket (e.g. reading from a
    /// broadcast socket).
    #[error("unsupported socket operation: {0}")]
    Unsupported(&'static str),

    /// Image payload could not be encoded.
    #[error("image encoding failed: {0}")]
    Image(String),
}

impl ProtocolError {
    /// The protocol status to report in-band for this error.
    pub fn status(&self) -> Status {
        match self {
            ProtocolError::Io(_) => Status::ServerError,
            ProtocolError::BadRequest(_) => Status::ClientBadRequest,
            ProtocolError::Overrun { .. } => Status::ClientOverrun,
            ProtocolError::Closed => Status::ResourceClosed,
            ProtocolError::Unsupported(_) => Status::Unsupported,
            ProtocolError::Image(_) => Status::ServerError,
        }
    }
}
