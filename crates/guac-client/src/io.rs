//! The per-user input loop: parse instructions off the user's transport
//! and dispatch them until the user or session winds down.

use crate::dispatch::dispatch;
use crate::user::User;
use guac_proto::protocol::send_error;
use guac_proto::{Parser, ProtocolError};
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info};

/// Drives one user's inbound instruction stream to completion. Returns
/// `Ok(())` on clean end-of-stream or orderly stop; protocol violations
/// are fatal to this user alone: a final `error` instruction is emitted,
/// the user is stopped, and the error is returned.
pub fn run_user_io<R: BufRead>(user: &Arc<User>, reader: &mut R) -> Result<(), ProtocolError> {
    let mut parser = Parser::new();

    loop {
        // Stop flags are honored at instruction boundaries; there is no
        // forced preemption.
        if user.is_stopped() {
            break;
        }
        match user.client() {
            Some(client) if !client.is_stopping() => {}
            _ => break,
        }

        match parser.read_instruction(reader) {
            Ok(Some(instruction)) => {
                if let Err(e) = dispatch(user, &instruction) {
                    fail_user(user, &e);
                    return Err(e);
                }
            }
            Ok(None) => {
                info!(target: "client.io", user = %user.id, "connection closed");
                break;
            }
            Err(e) => {
                fail_user(user, &e);
                return Err(e);
            }
        }
    }

    user.stop();
    Ok(())
}

fn fail_user(user: &Arc<User>, error: &ProtocolError) {
    debug!(target: "client.io", user = %user.id, error = %error, "user connection failed");
    // Best effort: the transport may already be gone.
    let _ = send_error(user.socket().as_ref(), &error.to_string(), error.status());
    let _ = user.socket().flush();
    user.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, NoopSessionHandler};
    use guac_proto::socket::BufferedSocket;
    use guac_proto::GuacSocket;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn user_with_sink() -> (Arc<Client>, Arc<User>, Sink) {
        let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
        let sink = Sink::default();
        let socket: Arc<dyn GuacSocket> = Arc::new(BufferedSocket::new(sink.clone()));
        let user = User::new(&client, socket, true);
        client.add_user(Arc::clone(&user));
        (client, user, sink)
    }

    #[test]
    fn clean_eof_stops_user_without_error() {
        let (_client, user, _sink) = user_with_sink();
        let mut reader = std::io::Cursor::new(b"4.sync,4.1000;3.nop;".to_vec());
        run_user_io(&user, &mut reader).unwrap();
        assert!(user.is_stopped());
        assert_eq!(user.last_received_timestamp(), 1000);
    }

    #[test]
    fn malformed_input_is_fatal_to_the_user() {
        let (_client, user, sink) = user_with_sink();
        let mut reader = std::io::Cursor::new(b"4.sync,4.1000;garbage".to_vec());
        assert!(run_user_io(&user, &mut reader).is_err());
        assert!(user.is_stopped());
        // A final error instruction was attempted on the user's socket.
        let out = String::from_utf8(sink.0.lock().clone()).unwrap();
        assert!(out.contains("5.error,"), "{out}");
    }

    #[test]
    fn disconnect_instruction_ends_the_loop() {
        let (_client, user, _sink) = user_with_sink();
        let mut reader =
            std::io::Cursor::new(b"10.disconnect;4.sync,4.9999;".to_vec());
        run_user_io(&user, &mut reader).unwrap();
        assert!(user.is_stopped());
        // Nothing after the disconnect was processed.
        assert_eq!(user.last_received_timestamp(), 0);
    }
}
