//! Guacamole instruction protocol: codec, socket abstraction, and the
//! instruction senders shared by the session layer, the terminal emulator,
//! and the recording encoder.
//!
//! The wire format is a sequence of length-prefixed UTF-8 elements:
//! `LENGTH.VALUE` joined by `,` and terminated by `;`, where `LENGTH` counts
//! code points, not bytes. Binary payloads travel as base64 elements whose
//! length prefix counts base64 characters. See [`parser`] for the streaming
//! decoder and [`protocol`] for the typed senders.

pub mod error;
pub mod parser;
pub mod protocol;
pub mod socket;
pub mod status;
pub mod timestamp;
pub mod types;
pub mod writer;

pub use error::ProtocolError;
pub use parser::{Instruction, Parser};
pub use socket::{BufferedSocket, GuacSocket, InstructionLock, TeeSocket};
pub use status::Status;
pub use timestamp::{current_timestamp, Timestamp};
pub use types::{CompositeMode, LineCapStyle, LineJoinStyle, ProtocolVersion, TransferFunction};

/// Index of the default (root) layer. Never disposed.
pub const DEFAULT_LAYER: i32 = 0;

/// Maximum number of bytes a single instruction may occupy on the wire.
pub const INSTRUCTION_MAX_LENGTH: usize = 8192;

/// Maximum number of elements (opcode included) per instruction.
pub const INSTRUCTION_MAX_ELEMENTS: usize = 128;
