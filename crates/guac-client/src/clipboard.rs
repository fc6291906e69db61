//! Session clipboard accumulator.
//!
//! Inbound clipboard streams fill a bounded buffer; once complete, the new
//! contents are rebroadcast to every connected user so all viewers share
//! one clipboard.

use crate::client::Client;
use crate::user::User;
use guac_proto::protocol::{send_blob, send_clipboard, send_end};
use guac_proto::{GuacSocket, ProtocolError, Status};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Maximum clipboard size, in bytes. Data past this limit is dropped.
pub const CLIPBOARD_MAX_LENGTH: usize = 262144;

/// Blob chunk size used when rebroadcasting clipboard contents.
const CLIPBOARD_BLOCK_SIZE: usize = 4096;

struct ClipboardInner {
    mimetype: String,
    buffer: Vec<u8>,
}

pub struct Clipboard {
    inner: Mutex<ClipboardInner>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClipboardInner {
                mimetype: String::from("text/plain"),
                buffer: Vec::new(),
            }),
        }
    }

    /// Discards current contents and records the mimetype of the data about
    /// to be received.
    pub fn reset(&self, mimetype: &str) {
        let mut inner = self.inner.lock();
        inner.mimetype = mimetype.to_owned();
        inner.buffer.clear();
    }

    /// Appends data, truncating at [`CLIPBOARD_MAX_LENGTH`].
    pub fn append(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        let remaining = CLIPBOARD_MAX_LENGTH.saturating_sub(inner.buffer.len());
        inner.buffer.extend_from_slice(&data[..data.len().min(remaining)]);
    }

    /// Current contents, for tests and drivers.
    pub fn contents(&self) -> (String, Vec<u8>) {
        let inner = self.inner.lock();
        (inner.mimetype.clone(), inner.buffer.clone())
    }

    /// Sends the clipboard over the given socket as a `clipboard` stream.
    pub fn send(&self, client: &Client, socket: &dyn GuacSocket) -> Result<(), ProtocolError> {
        let (mimetype, buffer) = self.contents();
        let Some(stream) = client.alloc_stream() else {
            debug!(target: "client.clipboard", "stream pool exhausted; clipboard not sent");
            return Ok(());
        };
        let result = (|| {
            send_clipboard(socket, stream, &mimetype)?;
            for chunk in buffer.chunks(CLIPBOARD_BLOCK_SIZE) {
                send_blob(socket, stream, chunk)?;
            }
            send_end(socket, stream)
        })();
        client.free_stream(stream);
        result
    }

    /// Wires an inbound clipboard stream from a viewer onto the session
    /// clipboard, rebroadcasting once the stream ends.
    pub fn begin_inbound_stream(&self, user: &Arc<User>, stream: i32, mimetype: &str) {
        let Some(client) = user.client() else {
            return;
        };
        self.reset(mimetype);

        let blob_client = Arc::clone(&client);
        let end_client = client;
        let result = user.open_inbound_stream(
            stream,
            Some(Box::new(move |_user, data| {
                blob_client.clipboard.append(data);
            })),
            Some(Box::new(move |_user| {
                let socket = end_client.socket();
                if let Err(e) = end_client.clipboard.send(&end_client, socket.as_ref()) {
                    debug!(target: "client.clipboard", error = %e, "clipboard rebroadcast failed");
                }
                let _ = socket.flush();
            })),
        );

        match result {
            Ok(()) => user.ack(stream, "Received", Status::Success),
            Err(status) => user.ack(stream, "Stream rejected", status),
        }
    }
}

impl Default for Clipboard {
    fn default() -> Self {
        Self::new()
    }
}
