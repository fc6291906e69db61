//! The session object: shared layers, buffers, streams, user lists, and the
//! broadcast sockets addressing them.
//!
//! A `Client` is one remote-desktop session. Viewers (`User`s) join and
//! leave dynamically; backend drivers draw through the session's broadcast
//! socket. New users sit in a pending list until a periodic timer runs the
//! backend's join-pending hook with a broadcast socket addressing only them,
//! then promotes them to the active list, so every viewer starts from a
//! fully re-duplicated display before seeing incremental updates.

use crate::argv::ArgvRegistry;
use crate::broadcast::{BroadcastScope, BroadcastSocket};
use crate::clipboard::Clipboard;
use crate::cursor::Cursor;
use crate::pool::{IndexPool, BUFFER_POOL_INITIAL_SIZE};
use crate::user::User;
use crossbeam_channel::{select, tick, Sender};
use guac_proto::protocol::{
    send_argv, send_blob, send_end, send_error, send_img, send_required, send_sync,
};
use guac_proto::{CompositeMode, GuacSocket, ProtocolError, ProtocolVersion, Status, Timestamp};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum number of session-scoped outbound streams.
pub const CLIENT_MAX_STREAMS: i32 = 512;

/// Interval at which pending users are synchronized and promoted.
pub const PENDING_PROMOTION_INTERVAL: Duration = Duration::from_millis(200);

/// Chunk size for convenience stream writers (`stream_png` and friends).
const STREAM_BLOB_SIZE: usize = 6048;

/// Backend hooks invoked by the session on user and input events. All
/// methods default to no-ops so drivers implement only what they need.
pub trait SessionHandler: Send + Sync {
    /// A user has joined (still pending promotion).
    fn on_user_join(&self, _client: &Arc<Client>, _user: &Arc<User>) {}

    /// A user has left the session.
    fn on_user_leave(&self, _client: &Arc<Client>, _user: &Arc<User>) {}

    /// Called with a broadcast socket addressing only pending users; the
    /// backend must re-duplicate the current display state onto it.
    fn join_pending(&self, _client: &Arc<Client>, _pending_socket: &dyn GuacSocket) {}

    fn on_mouse(&self, _user: &Arc<User>, _x: i32, _y: i32, _button_mask: i32) {}

    fn on_key(&self, _user: &Arc<User>, _keysym: i32, _pressed: bool) {}

    #[allow(clippy::too_many_arguments)]
    fn on_touch(
        &self,
        _user: &Arc<User>,
        _id: i32,
        _x: i32,
        _y: i32,
        _x_radius: i32,
        _y_radius: i32,
        _angle: f64,
        _force: f64,
    ) {
    }

    fn on_resize(&self, _user: &Arc<User>, _width: i32, _height: i32) {}

    fn on_sync(&self, _user: &Arc<User>, _timestamp: Timestamp) {}
}

/// Handler with no behavior, useful for tests and minimal sessions.
pub struct NoopSessionHandler;

impl SessionHandler for NoopSessionHandler {}

pub struct Client {
    /// Stable session identifier, prefixed `$`.
    pub id: String,
    stopping: AtomicBool,
    users: RwLock<Vec<Arc<User>>>,
    pending_users: RwLock<Vec<Arc<User>>>,
    socket: RwLock<Arc<dyn GuacSocket>>,
    pending_socket: Arc<dyn GuacSocket>,
    handler: Arc<dyn SessionHandler>,
    /// Connection parameter names advertised during the handshake.
    arg_names: Vec<String>,
    buffer_pool: IndexPool,
    layer_pool: IndexPool,
    stream_pool: IndexPool,
    last_sync: AtomicI64,
    pub argv: Arc<ArgvRegistry>,
    pub clipboard: Clipboard,
    pub cursor: Cursor,
    pending_worker: Mutex<Option<PendingWorker>>,
}

struct PendingWorker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl Client {
    /// Creates a session bound to the given backend handler. `arg_names`
    /// are the connection parameters the backend expects, sent verbatim in
    /// the handshake `args` instruction.
    pub fn new(handler: Arc<dyn SessionHandler>, arg_names: Vec<String>) -> Arc<Client> {
        Arc::new_cyclic(|weak| Client {
            id: format!("${}", Uuid::new_v4()),
            stopping: AtomicBool::new(false),
            users: RwLock::new(Vec::new()),
            pending_users: RwLock::new(Vec::new()),
            socket: RwLock::new(Arc::new(BroadcastSocket::new(
                weak.clone(),
                BroadcastScope::Active,
            )) as Arc<dyn GuacSocket>),
            pending_socket: Arc::new(BroadcastSocket::new(weak.clone(), BroadcastScope::Pending)),
            handler,
            arg_names,
            buffer_pool: IndexPool::new(BUFFER_POOL_INITIAL_SIZE),
            layer_pool: IndexPool::new(0),
            stream_pool: IndexPool::new(0),
            last_sync: AtomicI64::new(0),
            argv: Arc::new(ArgvRegistry::new()),
            clipboard: Clipboard::new(),
            cursor: Cursor::new(),
            pending_worker: Mutex::new(None),
        })
    }

    /// Spawns the pending-user promotion timer. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.pending_worker.lock();
        if worker.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        // The worker holds only a weak reference so an abandoned session can
        // still be dropped; the thread exits once the session is gone.
        let client = Arc::downgrade(self);
        let spawned = std::thread::Builder::new()
            .name("guac-pending".into())
            .spawn(move || {
                let ticker = tick(PENDING_PROMOTION_INTERVAL);
                loop {
                    select! {
                        recv(ticker) -> _ => match client.upgrade() {
                            Some(client) => client.promote_pending_users(),
                            None => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            });
        match spawned {
            Ok(handle) => {
                *worker = Some(PendingWorker {
                    shutdown: shutdown_tx,
                    handle,
                });
            }
            Err(e) => warn!(target: "client.session", session = %self.id, error = %e, "failed to spawn promotion timer"),
        }
    }

    /// The session's broadcast socket, possibly wrapped by a recording tee.
    pub fn socket(&self) -> Arc<dyn GuacSocket> {
        Arc::clone(&self.socket.read())
    }

    /// Replaces the broadcast socket (recording tees use this).
    pub fn set_socket(&self, socket: Arc<dyn GuacSocket>) {
        *self.socket.write() = socket;
    }

    pub fn handler(&self) -> &Arc<dyn SessionHandler> {
        &self.handler
    }

    pub fn arg_names(&self) -> Vec<&str> {
        self.arg_names.iter().map(String::as_str).collect()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Transitions the session to STOPPING: blocked argv waiters wake, the
    /// promotion timer drains, and I/O loops exit at their next boundary.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(target: "client.session", session = %self.id, "session stopping");
        self.argv.stop();
        let worker = self.pending_worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(());
            let _ = worker.handle.join();
        }
    }

    /// Emits a final `error` instruction to every user, then stops.
    pub fn abort(&self, status: Status, message: &str) {
        let socket = self.socket();
        // The session is going away: failures here are expected and silent.
        let _ = send_error(socket.as_ref(), message, status);
        let _ = socket.flush();
        self.stop();
    }

    /* User management */

    pub(crate) fn snapshot_users(&self) -> Vec<Arc<User>> {
        self.users.read().clone()
    }

    pub(crate) fn snapshot_pending_users(&self) -> Vec<Arc<User>> {
        self.pending_users.read().clone()
    }

    /// Adds a freshly-handshaken user to the pending list.
    pub fn add_user(self: &Arc<Self>, user: Arc<User>) {
        self.pending_users.write().push(Arc::clone(&user));
        debug!(target: "client.session", session = %self.id, user = %user.id, "user joined");
        self.handler.on_user_join(self, &user);
    }

    /// Removes a user from whichever list holds it.
    pub fn remove_user(self: &Arc<Self>, user: &Arc<User>) {
        let mut removed = false;
        {
            let mut users = self.users.write();
            if let Some(pos) = users.iter().position(|u| Arc::ptr_eq(u, user)) {
                users.remove(pos);
                removed = true;
            }
        }
        if !removed {
            let mut pending = self.pending_users.write();
            if let Some(pos) = pending.iter().position(|u| Arc::ptr_eq(u, user)) {
                pending.remove(pos);
                removed = true;
            }
        }
        if removed {
            debug!(target: "client.session", session = %self.id, user = %user.id, "user left");
            self.handler.on_user_leave(self, user);
        }
    }

    /// Count of users currently joined, pending included.
    pub fn user_count(&self) -> usize {
        self.users.read().len() + self.pending_users.read().len()
    }

    /// Runs the join-pending hook against pending users and atomically
    /// promotes them to the active list. Invoked by the promotion timer;
    /// exposed for deterministic tests.
    pub fn promote_pending_users(self: &Arc<Self>) {
        if self.is_stopping() {
            return;
        }
        if self.pending_users.read().is_empty() {
            return;
        }
        self.handler.join_pending(self, self.pending_socket.as_ref());
        let _ = self.pending_socket.flush();

        let mut pending = self.pending_users.write();
        let mut users = self.users.write();
        for user in pending.drain(..) {
            user.set_active(true);
            users.push(user);
        }
    }

    /// Iterates active users under the list's read lock. The callback must
    /// not mutate the user list.
    pub fn foreach_user(&self, mut f: impl FnMut(&Arc<User>)) {
        for user in self.users.read().iter() {
            f(user);
        }
    }

    /// As [`Client::foreach_user`], but for users awaiting promotion.
    pub fn foreach_pending_user(&self, mut f: impl FnMut(&Arc<User>)) {
        for user in self.pending_users.read().iter() {
            f(user);
        }
    }

    /// Runs a closure against the session owner, if one is connected.
    pub fn for_owner<T>(&self, f: impl FnOnce(&Arc<User>) -> T) -> Option<T> {
        let users = self.users.read();
        if let Some(owner) = users.iter().find(|u| u.is_owner()) {
            return Some(f(owner));
        }
        drop(users);
        let pending = self.pending_users.read();
        pending.iter().find(|u| u.is_owner()).map(f)
    }

    /* Resource pools */

    /// Allocates a visible layer index (>= 1; the default layer is never
    /// pooled).
    pub fn alloc_layer(&self) -> i32 {
        self.layer_pool.next() + 1
    }

    pub fn free_layer(&self, index: i32) {
        self.layer_pool.release(index - 1);
    }

    /// Allocates an offscreen buffer index (negative on the wire).
    pub fn alloc_buffer(&self) -> i32 {
        -self.buffer_pool.next() - 1
    }

    pub fn free_buffer(&self, index: i32) {
        self.buffer_pool.release(-index - 1);
    }

    /// Allocates a session-scoped outbound stream index, or `None` when the
    /// session-wide limit is reached.
    pub fn alloc_stream(&self) -> Option<i32> {
        let index = self.stream_pool.next();
        if index >= CLIENT_MAX_STREAMS {
            return None;
        }
        Some(index)
    }

    pub fn free_stream(&self, index: i32) {
        self.stream_pool.release(index);
    }

    /// Requests updated values for the named parameters from the session
    /// owner via a `required` instruction. Returns false when the owner's
    /// negotiated protocol version predates `required`; the backend then
    /// falls back to eager parameter collection.
    pub fn request_required(&self, names: &[&str]) -> bool {
        let supported = self
            .for_owner(|owner| owner.info.lock().protocol_version >= ProtocolVersion::V1_3_0)
            .unwrap_or(false);
        if !supported {
            return false;
        }
        self.for_owner(|owner| {
            if let Err(e) = send_required(owner.socket().as_ref(), names) {
                owner.handle_write_error(e);
                return;
            }
            let _ = owner.socket().flush();
        });
        true
    }

    /* Frame bookkeeping */

    pub fn last_sync(&self) -> Timestamp {
        self.last_sync.load(Ordering::Acquire)
    }

    /// Broadcasts a `sync` marking the end of the current logical frame.
    pub fn sync(&self, timestamp: Timestamp) -> Result<(), ProtocolError> {
        let socket = self.socket();
        send_sync(socket.as_ref(), timestamp)?;
        socket.flush()?;
        self.last_sync.store(timestamp, Ordering::Release);
        Ok(())
    }

    /* Convenience stream writers */

    /// Streams a PNG-encoded surface as an `img` stream: `img`, `blob`s,
    /// `end`. Degrades to a no-op warning when streams are exhausted.
    pub fn stream_png(
        &self,
        socket: &dyn GuacSocket,
        mode: CompositeMode,
        layer: i32,
        x: i32,
        y: i32,
        surface: &RgbaImage,
    ) -> Result<(), ProtocolError> {
        let mut encoded = Vec::new();
        PngEncoder::new(&mut encoded)
            .write_image(
                surface.as_raw(),
                surface.width(),
                surface.height(),
                ExtendedColorType::Rgba8,
            )
            .map_err(|e| ProtocolError::Image(e.to_string()))?;
        self.stream_image(socket, mode, layer, "image/png", x, y, &encoded)
    }

    /// Streams a JPEG-encoded surface (alpha discarded) as an `img` stream.
    #[allow(clippy::too_many_arguments)]
    pub fn stream_jpeg(
        &self,
        socket: &dyn GuacSocket,
        mode: CompositeMode,
        layer: i32,
        x: i32,
        y: i32,
        surface: &RgbaImage,
        quality: u8,
    ) -> Result<(), ProtocolError> {
        let rgb: image::RgbImage = image::DynamicImage::ImageRgba8(surface.clone()).to_rgb8();
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, quality)
            .write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| ProtocolError::Image(e.to_string()))?;
        self.stream_image(socket, mode, layer, "image/jpeg", x, y, &encoded)
    }

    #[allow(clippy::too_many_arguments)]
    fn stream_image(
        &self,
        socket: &dyn GuacSocket,
        mode: CompositeMode,
        layer: i32,
        mimetype: &str,
        x: i32,
        y: i32,
        encoded: &[u8],
    ) -> Result<(), ProtocolError> {
        let Some(stream) = self.alloc_stream() else {
            warn!(target: "client.session", session = %self.id, "stream pool exhausted; image dropped");
            return Ok(());
        };
        let result = (|| {
            send_img(socket, stream, mode, layer, mimetype, x, y)?;
            for chunk in encoded.chunks(STREAM_BLOB_SIZE) {
                send_blob(socket, stream, chunk)?;
            }
            send_end(socket, stream)
        })();
        self.free_stream(stream);
        result
    }

    /// Broadcasts the accepted value of a named parameter over an outbound
    /// `argv` stream.
    pub fn stream_argv(
        &self,
        socket: &dyn GuacSocket,
        mimetype: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ProtocolError> {
        let Some(stream) = self.alloc_stream() else {
            warn!(target: "client.session", session = %self.id, "stream pool exhausted; argv echo dropped");
            return Ok(());
        };
        let result = (|| {
            send_argv(socket, stream, mimetype, name)?;
            for chunk in value.as_bytes().chunks(STREAM_BLOB_SIZE) {
                send_blob(socket, stream, chunk)?;
            }
            send_end(socket, stream)
        })();
        self.free_stream(stream);
        result
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(worker) = self.pending_worker.get_mut().take() {
            let _ = worker.shutdown.send(());
            let _ = worker.handle.join();
        }
    }
}
