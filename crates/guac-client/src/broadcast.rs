//! Fan-out socket addressing every user of a session.
//!
//! Writes are forwarded to each participant's socket; a failure signals only
//! that user to stop, never the broadcast as a whole. Instruction brackets
//! take the session-wide broadcast lock first and each per-user lock second
//! (lock order: session before user, never the reverse), which serializes
//! whole instructions across producers.

use crate::client::Client;
use crate::user::User;
use guac_proto::socket::InstructionLock;
use guac_proto::{GuacSocket, ProtocolError};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Which user list a broadcast socket addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BroadcastScope {
    /// Users already promoted to the active list.
    Active,
    /// Users still awaiting their first synchronized frame.
    Pending,
}

pub struct BroadcastSocket {
    client: Weak<Client>,
    scope: BroadcastScope,
    lock: InstructionLock,
    /// Stack of participant snapshots, one per open bracket. The snapshot
    /// taken at `instruction_begin` is reused by `instruction_end` so the
    /// begin/end pairs stay balanced even if the user list changes inside
    /// the bracket.
    participants: Mutex<Vec<Vec<Arc<User>>>>,
}

impl BroadcastSocket {
    pub(crate) fn new(client: Weak<Client>, scope: BroadcastScope) -> Self {
        Self {
            client,
            scope,
            lock: InstructionLock::new(),
            participants: Mutex::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> Vec<Arc<User>> {
        match self.client.upgrade() {
            Some(client) => match self.scope {
                BroadcastScope::Active => client.snapshot_users(),
                BroadcastScope::Pending => client.snapshot_pending_users(),
            },
            None => Vec::new(),
        }
    }

    fn for_each(&self, f: impl Fn(&Arc<User>) -> Result<(), ProtocolError>) {
        // Inside a bracket, address exactly the users whose locks are held.
        let participants = self.participants.lock();
        if let Some(snapshot) = participants.last() {
            for user in snapshot {
                if let Err(e) = f(user) {
                    user.handle_write_error(e);
                }
            }
            return;
        }
        drop(participants);
        for user in self.snapshot() {
            if let Err(e) = f(&user) {
                user.handle_write_error(e);
            }
        }
    }
}

impl GuacSocket for BroadcastSocket {
    fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        self.for_each(|user| user.socket().write(data));
        Ok(())
    }

    fn flush(&self) -> Result<(), ProtocolError> {
        self.for_each(|user| user.socket().flush());
        Ok(())
    }

    fn instruction_begin(&self) {
        self.lock.acquire();
        let snapshot = self.snapshot();
        for user in &snapshot {
            user.socket().instruction_begin();
        }
        self.participants.lock().push(snapshot);
    }

    fn instruction_end(&self) {
        let snapshot = self.participants.lock().pop();
        if let Some(users) = snapshot {
            for user in &users {
                user.socket().instruction_end();
            }
        }
        self.lock.release();
    }

    fn close(&self) {
        // Closing the broadcast does not close the per-user transports; the
        // session tears those down individually.
    }
}
