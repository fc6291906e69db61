//! Shared pointer tracking.
//!
//! Mouse movement from any viewer is attributed to that viewer and relayed
//! to all other users so every display shows the same pointer position.

use crate::client::Client;
use crate::user::User;
use guac_proto::protocol::send_mouse;
use guac_proto::{current_timestamp, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CursorPosition {
    pub x: i32,
    pub y: i32,
    pub button_mask: i32,
    /// Id of the user who last moved the pointer.
    pub user: Option<String>,
    pub timestamp: Timestamp,
}

pub struct Cursor {
    inner: Mutex<CursorPosition>,
}

impl Cursor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CursorPosition {
                x: 0,
                y: 0,
                button_mask: 0,
                user: None,
                timestamp: 0,
            }),
        }
    }

    pub fn position(&self) -> CursorPosition {
        self.inner.lock().clone()
    }

    /// Records a pointer move from `mover` and relays it to every other
    /// active user.
    pub fn update(&self, client: &Arc<Client>, mover: &Arc<User>, x: i32, y: i32, mask: i32) {
        let timestamp = current_timestamp();
        {
            let mut inner = self.inner.lock();
            inner.x = x;
            inner.y = y;
            inner.button_mask = mask;
            inner.user = Some(mover.id.clone());
            inner.timestamp = timestamp;
        }
        client.foreach_user(|user| {
            if user.id == mover.id {
                return;
            }
            if let Err(e) = send_mouse(user.socket().as_ref(), x, y, mask, timestamp) {
                user.handle_write_error(e);
            }
        });
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}
