//! Per-viewer state: identity, socket, inbound streams, and objects.

use crate::client::Client;
use crate::pool::IndexPool;
use guac_proto::{GuacSocket, ProtocolError, ProtocolVersion, Status, Timestamp};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

/// Maximum number of simultaneous inbound streams per user.
pub const USER_MAX_STREAMS: usize = 64;

/// Maximum number of objects per user.
pub const USER_MAX_OBJECTS: usize = 64;

/// Display and media capabilities announced by a viewer during the
/// handshake.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub optimal_width: i32,
    pub optimal_height: i32,
    pub optimal_resolution: i32,
    pub audio_mimetypes: Vec<String>,
    pub video_mimetypes: Vec<String>,
    pub image_mimetypes: Vec<String>,
    pub protocol_version: ProtocolVersion,
}

impl Default for UserInfo {
    fn default() -> Self {
        Self {
            optimal_width: 1024,
            optimal_height: 768,
            optimal_resolution: 96,
            audio_mimetypes: Vec::new(),
            video_mimetypes: Vec::new(),
            image_mimetypes: Vec::new(),
            protocol_version: ProtocolVersion::V1_0_0,
        }
    }
}

/// Handler invoked as blob data arrives on an inbound stream.
pub type BlobHandler = Box<dyn FnMut(&Arc<User>, &[u8]) + Send>;

/// Handler invoked when an inbound stream ends.
pub type EndHandler = Box<dyn FnOnce(&Arc<User>) + Send>;

/// One inbound stream in progress. The index is chosen by the remote
/// viewer; handlers are registered by whatever opcode opened the stream.
pub struct InboundStream {
    pub index: i32,
    pub blob_handler: Option<BlobHandler>,
    pub end_handler: Option<EndHandler>,
}

pub struct User {
    /// Stable identifier, prefixed `@` to distinguish users from sessions.
    pub id: String,
    pub info: Mutex<UserInfo>,
    client: Weak<Client>,
    socket: Arc<dyn GuacSocket>,
    owner: bool,
    active: AtomicBool,
    stopped: AtomicBool,
    last_received_timestamp: AtomicI64,
    streams: Mutex<Vec<Option<InboundStream>>>,
    objects: Mutex<Vec<bool>>,
    output_stream_pool: IndexPool,
}

impl User {
    pub fn new(client: &Arc<Client>, socket: Arc<dyn GuacSocket>, owner: bool) -> Arc<User> {
        let mut streams = Vec::with_capacity(USER_MAX_STREAMS);
        streams.resize_with(USER_MAX_STREAMS, || None);
        Arc::new(User {
            id: format!("@{}", Uuid::new_v4()),
            info: Mutex::new(UserInfo::default()),
            client: Arc::downgrade(client),
            socket,
            owner,
            active: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            last_received_timestamp: AtomicI64::new(0),
            streams: Mutex::new(streams),
            objects: Mutex::new(vec![false; USER_MAX_OBJECTS]),
            output_stream_pool: IndexPool::new(0),
        })
    }

    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.upgrade()
    }

    pub fn socket(&self) -> &Arc<dyn GuacSocket> {
        &self.socket
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Whether the user has been promoted out of the pending list.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Signals the user's I/O loop to wind down. Transport-level failures
    /// route here so one broken viewer cannot stall its peers.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!(target: "client.user", user = %self.id, "user stopping");
        }
    }

    pub fn last_received_timestamp(&self) -> Timestamp {
        self.last_received_timestamp.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_received_timestamp(&self, timestamp: Timestamp) {
        self.last_received_timestamp
            .store(timestamp, Ordering::Relaxed);
    }

    /// Registers handlers for an inbound stream opened by the remote viewer.
    /// Fails with `ClientTooMany` when the index is outside the per-user
    /// stream range, or `ClientBadRequest` if the slot is already in use.
    pub fn open_inbound_stream(
        &self,
        index: i32,
        blob_handler: Option<BlobHandler>,
        end_handler: Option<EndHandler>,
    ) -> Result<(), Status> {
        let slot = usize::try_from(index).map_err(|_| Status::ClientBadRequest)?;
        if slot >= USER_MAX_STREAMS {
            return Err(Status::ClientTooMany);
        }
        let mut streams = self.streams.lock();
        if streams[slot].is_some() {
            return Err(Status::ClientBadRequest);
        }
        streams[slot] = Some(InboundStream {
            index,
            blob_handler,
            end_handler,
        });
        Ok(())
    }

    /// Routes a decoded blob to the stream's handler. The handler is taken
    /// out of the slot for the duration of the call so it may itself open
    /// or close streams without deadlocking.
    pub(crate) fn stream_blob(self: &Arc<Self>, index: i32, data: &[u8]) -> Result<(), Status> {
        let slot = usize::try_from(index).map_err(|_| Status::ClientBadRequest)?;
        let mut handler = {
            let mut streams = self.streams.lock();
            match streams.get_mut(slot).and_then(Option::as_mut) {
                Some(stream) => stream.blob_handler.take(),
                None => return Err(Status::ResourceNotFound),
            }
        };
        if let Some(ref mut h) = handler {
            h(self, data);
        }
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.get_mut(slot).and_then(Option::as_mut) {
            stream.blob_handler = handler;
        }
        Ok(())
    }

    /// Closes an inbound stream and fires its end handler.
    pub(crate) fn stream_end(self: &Arc<Self>, index: i32) -> Result<(), Status> {
        let slot = usize::try_from(index).map_err(|_| Status::ClientBadRequest)?;
        let stream = {
            let mut streams = self.streams.lock();
            match streams.get_mut(slot) {
                Some(entry) => entry.take(),
                None => None,
            }
        };
        let stream = stream.ok_or(Status::ResourceNotFound)?;
        if let Some(end) = stream.end_handler {
            end(self);
        }
        Ok(())
    }

    /// Allocates an index for a stream directed at this user alone, or
    /// `None` when the per-user limit is reached.
    pub fn alloc_output_stream(&self) -> Option<i32> {
        let index = self.output_stream_pool.next();
        if index >= USER_MAX_STREAMS as i32 {
            return None;
        }
        Some(index)
    }

    pub fn free_output_stream(&self, index: i32) {
        self.output_stream_pool.release(index);
    }

    /// Allocates an object index, or `None` if the per-user limit is hit.
    pub fn alloc_object(&self) -> Option<i32> {
        let mut objects = self.objects.lock();
        let slot = objects.iter().position(|used| !used)?;
        objects[slot] = true;
        Some(slot as i32)
    }

    pub fn free_object(&self, index: i32) {
        if let Ok(slot) = usize::try_from(index) {
            let mut objects = self.objects.lock();
            if slot < objects.len() {
                objects[slot] = false;
            }
        }
    }

    /// Best-effort ack on this user's socket.
    pub fn ack(&self, stream: i32, message: &str, status: Status) {
        if let Err(e) = guac_proto::protocol::send_ack(self.socket.as_ref(), stream, message, status)
        {
            self.handle_write_error(e);
        }
    }

    pub(crate) fn handle_write_error(&self, error: ProtocolError) {
        debug!(target: "client.user", user = %self.id, error = %error, "write failed");
        self.stop();
    }
}
