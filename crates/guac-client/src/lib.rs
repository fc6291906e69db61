//! Session object model for the Guacamole gateway: users, broadcast
//! sockets, resource pools, and the per-session services (argv, audio,
//! clipboard, cursor, recording) that backends build on.
//!
//! One [`client::Client`] is one remote-desktop session. Backend drivers
//! draw through [`client::Client::socket`]; viewers are [`user::User`]s fed
//! by [`dispatch::dispatch`]. New viewers are promoted from a pending list
//! by a periodic timer so each one starts from a complete frame.

pub mod argv;
pub mod audio;
pub mod broadcast;
pub mod client;
pub mod clipboard;
pub mod cursor;
pub mod dispatch;
pub mod handshake;
pub mod io;
pub mod pool;
pub mod recording;
pub mod user;

pub use argv::{ArgvOptions, ArgvRegistry};
pub use audio::AudioStream;
pub use client::{Client, NoopSessionHandler, SessionHandler};
pub use dispatch::dispatch;
pub use io::run_user_io;
pub use pool::IndexPool;
pub use recording::{Recording, RecordingFlags};
pub use user::{User, UserInfo};
