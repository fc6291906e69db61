//! Outbound audio stream framing.
//!
//! PCM pushed by a backend is buffered up to roughly a quarter second and
//! drained as `blob`s over the session's broadcast socket. Only raw PCM
//! encodings ship: `audio/L8` and `audio/L16`; the encoding is chosen from
//! the mimetypes the session owner advertised during its handshake.

use crate::client::Client;
use guac_proto::protocol::{send_audio, send_blob, send_end};
use guac_proto::{GuacSocket, ProtocolError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Duration of PCM buffered before a flush, in milliseconds.
pub const AUDIO_BUFFER_MILLIS: usize = 250;

/// Maximum size of one audio `blob`.
pub const AUDIO_BLOB_SIZE: usize = 6048;

struct AudioInner {
    rate: i32,
    channels: i32,
    bps: i32,
    buffer: Vec<u8>,
    written: usize,
}

impl AudioInner {
    fn mimetype(&self) -> String {
        format!(
            "audio/L{};rate={},channels={}",
            self.bps, self.rate, self.channels
        )
    }

    fn buffer_len(rate: i32, channels: i32, bps: i32) -> usize {
        AUDIO_BUFFER_MILLIS * rate as usize * channels as usize * bps as usize / 8 / 1000
    }
}

pub struct AudioStream {
    client: Arc<Client>,
    stream: i32,
    inner: Mutex<AudioInner>,
}

impl AudioStream {
    /// Allocates an audio stream for the given PCM parameters. Returns
    /// `None` when the owner advertised no matching raw mimetype or the
    /// session is out of streams.
    pub fn new(client: &Arc<Client>, rate: i32, channels: i32, bps: i32) -> Option<Arc<AudioStream>> {
        let wanted = format!("audio/L{bps}");
        let supported = client
            .for_owner(|owner| {
                owner
                    .info
                    .lock()
                    .audio_mimetypes
                    .iter()
                    .any(|mimetype| mimetype == &wanted)
            })
            .unwrap_or(false);
        if !supported {
            debug!(target: "client.audio", %wanted, "owner does not accept raw audio");
            return None;
        }

        let stream = client.alloc_stream()?;
        let audio = Arc::new(AudioStream {
            client: Arc::clone(client),
            stream,
            inner: Mutex::new(AudioInner {
                rate,
                channels,
                bps,
                buffer: vec![0; AudioInner::buffer_len(rate, channels, bps)],
                written: 0,
            }),
        });
        audio.announce(audio.client.socket().as_ref());
        Some(audio)
    }

    /// Broadcasts (or re-announces, for a joining user's socket) the
    /// existence of this stream.
    pub fn announce(&self, socket: &dyn GuacSocket) {
        let mimetype = self.inner.lock().mimetype();
        if let Err(e) = send_audio(socket, self.stream, &mimetype) {
            debug!(target: "client.audio", error = %e, "audio announcement failed");
        }
    }

    /// Re-announces the stream to a user that joined mid-session.
    pub fn add_user(&self, user: &Arc<crate::user::User>) {
        self.announce(user.socket().as_ref());
    }

    /// Buffers PCM, flushing as the buffer fills.
    pub fn write_pcm(&self, mut data: &[u8]) -> Result<(), ProtocolError> {
        let socket = self.client.socket();
        let mut inner = self.inner.lock();
        while !data.is_empty() {
            let space = inner.buffer.len() - inner.written;
            if space == 0 {
                Self::flush_locked(&mut inner, self.stream, socket.as_ref())?;
                continue;
            }
            let chunk = space.min(data.len());
            let written = inner.written;
            inner.buffer[written..written + chunk].copy_from_slice(&data[..chunk]);
            inner.written += chunk;
            data = &data[chunk..];
        }
        Ok(())
    }

    /// Drains buffered PCM as `blob`s of at most [`AUDIO_BLOB_SIZE`] bytes.
    pub fn flush(&self) -> Result<(), ProtocolError> {
        let socket = self.client.socket();
        let mut inner = self.inner.lock();
        Self::flush_locked(&mut inner, self.stream, socket.as_ref())
    }

    fn flush_locked(
        inner: &mut AudioInner,
        stream: i32,
        socket: &dyn GuacSocket,
    ) -> Result<(), ProtocolError> {
        let mut offset = 0;
        while offset < inner.written {
            let chunk = (inner.written - offset).min(AUDIO_BLOB_SIZE);
            send_blob(socket, stream, &inner.buffer[offset..offset + chunk])?;
            offset += chunk;
        }
        inner.written = 0;
        Ok(())
    }

    /// Atomically ends and restarts the stream if any PCM parameter
    /// changed. No-op otherwise.
    pub fn reset(&self, rate: i32, channels: i32, bps: i32) -> Result<(), ProtocolError> {
        let socket = self.client.socket();
        let mut inner = self.inner.lock();
        if inner.rate == rate && inner.channels == channels && inner.bps == bps {
            return Ok(());
        }
        Self::flush_locked(&mut inner, self.stream, socket.as_ref())?;
        send_end(socket.as_ref(), self.stream)?;

        inner.rate = rate;
        inner.channels = channels;
        inner.bps = bps;
        inner.buffer = vec![0; AudioInner::buffer_len(rate, channels, bps)];
        inner.written = 0;
        send_audio(socket.as_ref(), self.stream, &inner.mimetype())
    }

    /// Flushes remaining PCM and ends the stream, returning its index to
    /// the session pool.
    pub fn close(&self) {
        let socket = self.client.socket();
        let mut inner = self.inner.lock();
        let _ = Self::flush_locked(&mut inner, self.stream, socket.as_ref());
        let _ = send_end(socket.as_ref(), self.stream);
        self.client.free_stream(self.stream);
    }
}
