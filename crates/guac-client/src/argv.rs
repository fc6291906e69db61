//! Automatic processing of inbound `argv` streams.
//!
//! Backends register named parameters with a callback; values later arrive
//! from viewers over `argv` streams and are applied once fully received.
//! The registry is session-scoped (not process-global) so several sessions
//! can coexist in one process without cross-talk.

use crate::user::User;
use bitflags::bitflags;
use guac_proto::Status;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::debug;

/// Maximum length of an argument value, in bytes. Excess input is truncated.
pub const ARGV_MAX_LENGTH: usize = 16384;

/// Maximum length of an argument name, in bytes.
pub const ARGV_MAX_NAME_LENGTH: usize = 256;

/// Maximum number of registered arguments per session.
pub const ARGV_MAX_REGISTERED: usize = 128;

bitflags! {
    /// Options affecting how received values are processed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArgvOptions: u32 {
        /// Invoke the callback for the first received value only.
        const ONCE = 1;
        /// Rebroadcast accepted values to all users via an `argv` stream.
        const ECHO = 2;
    }
}

/// Callback receiving `(user, mimetype, name, value)` for an accepted value.
pub type ArgvCallback = Arc<dyn Fn(&Arc<User>, &str, &str, &str) + Send + Sync>;

struct ArgvState {
    name: String,
    options: ArgvOptions,
    callback: ArgvCallback,
    received: bool,
}

struct RegistryInner {
    stopped: bool,
    registered: Vec<ArgvState>,
}

pub struct ArgvRegistry {
    inner: Mutex<RegistryInner>,
    changed: Condvar,
}

impl ArgvRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                stopped: false,
                registered: Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    /// Registers a named parameter. Returns false when the registry is full
    /// or the name is over-long.
    pub fn register(&self, name: &str, options: ArgvOptions, callback: ArgvCallback) -> bool {
        if name.len() > ARGV_MAX_NAME_LENGTH {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.registered.len() >= ARGV_MAX_REGISTERED {
            return false;
        }
        inner.registered.push(ArgvState {
            name: name.to_owned(),
            options,
            callback,
            received: false,
        });
        true
    }

    /// Blocks until at least one value has been received for every named
    /// argument, or until [`ArgvRegistry::stop`] releases all waiters.
    /// Returns true if the values were received, false if stopped first.
    pub fn await_values(&self, names: &[&str]) -> bool {
        let mut inner = self.inner.lock();
        while !inner.stopped && !Self::is_received(&inner, names) {
            self.changed.wait(&mut inner);
        }
        !inner.stopped
    }

    /// Releases all waiters permanently.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        self.changed.notify_all();
    }

    fn is_received(inner: &RegistryInner, names: &[&str]) -> bool {
        for state in &inner.registered {
            if state.received {
                continue;
            }
            if names.iter().any(|name| *name == state.name) {
                return false;
            }
        }
        true
    }

    /// Accepts an inbound `argv` stream for a registered name, wiring blob
    /// and end handlers onto the user's stream slot. Returns false when the
    /// name is not registered, in which case the caller rejects the stream
    /// with `CLIENT_FORBIDDEN`.
    ///
    /// A stream for a name whose `ONCE` value was already accepted is still
    /// taken onto the socket; its content is simply discarded at end time.
    pub fn received(
        self: &Arc<Self>,
        user: &Arc<User>,
        stream: i32,
        mimetype: &str,
        name: &str,
    ) -> bool {
        let registered = {
            let inner = self.inner.lock();
            inner.registered.iter().any(|state| state.name == name)
        };
        if !registered {
            return false;
        }

        let registry = Arc::clone(self);
        let name = name.to_owned();
        let mimetype = mimetype.to_owned();
        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        let blob_buffer = Arc::clone(&buffer);

        let result = user.open_inbound_stream(
            stream,
            Some(Box::new(move |_user, data| {
                let mut value = blob_buffer.lock();
                let remaining = ARGV_MAX_LENGTH.saturating_sub(value.len());
                value.extend_from_slice(&data[..data.len().min(remaining)]);
            })),
            Some(Box::new(move |user| {
                let value = buffer.lock();
                registry.apply(user, &mimetype, &name, &value);
            })),
        );

        match result {
            Ok(()) => {
                user.ack(stream, "Received", Status::Success);
                true
            }
            Err(status) => {
                user.ack(stream, "Stream rejected", status);
                // The name itself was valid; the stream slot was not.
                true
            }
        }
    }

    /// Applies a completely-received value: invokes the callback (subject to
    /// `ONCE`), echoes if requested, and wakes waiters.
    fn apply(&self, user: &Arc<User>, mimetype: &str, name: &str, value: &[u8]) {
        let value = String::from_utf8_lossy(value).into_owned();

        let (callback, echo) = {
            let mut inner = self.inner.lock();
            let Some(state) = inner.registered.iter_mut().find(|s| s.name == name) else {
                return;
            };
            let callback = if state.options.contains(ArgvOptions::ONCE) && state.received {
                debug!(target: "client.argv", name, "duplicate value for ONCE argument ignored");
                None
            } else {
                Some(Arc::clone(&state.callback))
            };
            let echo = callback.is_some() && state.options.contains(ArgvOptions::ECHO);
            state.received = true;
            self.changed.notify_all();
            (callback, echo)
        };

        if let Some(callback) = callback {
            callback(user, mimetype, name, &value);
        }

        if echo {
            if let Some(client) = user.client() {
                let socket = client.socket();
                if let Err(e) = client.stream_argv(socket.as_ref(), mimetype, name, &value) {
                    debug!(target: "client.argv", name, error = %e, "argv echo failed");
                }
            }
        }
    }
}

impl Default for ArgvRegistry {
    fn default() -> Self {
        Self::new()
    }
}
