//! Session-level behavior: broadcast fan-out, pending promotion, pools,
//! and argv stream processing.

use guac_client::argv::ArgvOptions;
use guac_client::client::{Client, NoopSessionHandler, SessionHandler};
use guac_client::dispatch::dispatch;
use guac_client::user::User;
use guac_proto::protocol::send_name;
use guac_proto::socket::BufferedSocket;
use guac_proto::{GuacSocket, Instruction, Parser};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

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

impl Sink {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().clone()).unwrap()
    }
}

fn join_user(client: &Arc<Client>, owner: bool) -> (Arc<User>, Sink) {
    let sink = Sink::default();
    let socket: Arc<dyn GuacSocket> = Arc::new(BufferedSocket::new(sink.clone()));
    let user = User::new(client, socket, owner);
    client.add_user(Arc::clone(&user));
    (user, sink)
}

fn instruction(opcode: &str, args: &[&str]) -> Instruction {
    Instruction {
        opcode: opcode.to_owned(),
        args: args.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn broadcast_reaches_active_users_only() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (_owner, owner_sink) = join_user(&client, true);
    client.promote_pending_users();

    let (_late, late_sink) = join_user(&client, false);

    let socket = client.socket();
    send_name(socket.as_ref(), "shared").unwrap();
    socket.flush().unwrap();

    assert_eq!(owner_sink.contents(), "4.name,6.shared;");
    assert_eq!(late_sink.contents(), "");
}

#[test]
fn join_pending_runs_before_promotion() {
    struct RecordingHandler {
        pending_frames: AtomicUsize,
    }

    impl SessionHandler for RecordingHandler {
        fn join_pending(&self, client: &Arc<Client>, pending_socket: &dyn GuacSocket) {
            // Re-duplicate display state for pending users only.
            send_name(pending_socket, "replay").unwrap();
            guac_proto::protocol::send_sync(pending_socket, client.last_sync()).unwrap();
            self.pending_frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    let handler = Arc::new(RecordingHandler {
        pending_frames: AtomicUsize::new(0),
    });
    let client = Client::new(Arc::clone(&handler) as Arc<dyn SessionHandler>, Vec::new());

    let (_owner, owner_sink) = join_user(&client, true);
    client.promote_pending_users();
    owner_sink.0.lock().clear();
    client.sync(5000).unwrap();

    let (joiner, joiner_sink) = join_user(&client, false);
    assert!(!joiner.is_active());

    client.promote_pending_users();
    assert!(joiner.is_active());
    assert_eq!(handler.pending_frames.load(Ordering::SeqCst), 1);

    // The joiner received the replayed state and a sync at the session's
    // last_sync; the owner received neither.
    let replayed = joiner_sink.contents();
    assert!(replayed.contains("4.name,6.replay;"));
    assert!(replayed.contains("4.sync,4.5000;"));
    assert!(!owner_sink.contents().contains("replay"));

    // Subsequent broadcasts now reach the promoted user.
    let socket = client.socket();
    send_name(socket.as_ref(), "after").unwrap();
    socket.flush().unwrap();
    assert!(joiner_sink.contents().contains("4.name,5.after;"));
}

#[test]
fn concurrent_broadcasts_serialize_per_instruction() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (_a, sink_a) = join_user(&client, true);
    let (_b, sink_b) = join_user(&client, false);
    client.promote_pending_users();

    let mut handles = Vec::new();
    for id in 0..4 {
        let client = Arc::clone(&client);
        handles.push(std::thread::spawn(move || {
            let marker = format!("writer-{id}-payload");
            for _ in 0..50 {
                let socket = client.socket();
                send_name(socket.as_ref(), &marker).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    client.socket().flush().unwrap();

    for sink in [sink_a, sink_b] {
        let bytes = sink.0.lock().clone();
        let mut parser = Parser::new();
        let mut reader = std::io::Cursor::new(bytes);
        let mut count = 0;
        while let Some(instruction) = parser.read_instruction(&mut reader).unwrap() {
            assert_eq!(instruction.opcode, "name");
            assert!(
                instruction.arg(0).starts_with("writer-"),
                "corrupt payload: {instruction:?}"
            );
            count += 1;
        }
        assert_eq!(count, 200, "every instruction arrives exactly once");
    }
}

#[test]
fn layer_and_buffer_indices_partition() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let layer = client.alloc_layer();
    let buffer = client.alloc_buffer();
    assert!(layer >= 1, "visible layers start at 1");
    assert!(buffer <= -1, "buffers are negative on the wire");

    // Buffer indices are not reused until the pool minimum is exceeded.
    client.free_buffer(buffer);
    let next = client.alloc_buffer();
    assert_ne!(next, buffer);

    // Freed layers are reused immediately (minimum size 0).
    client.free_layer(layer);
    assert_eq!(client.alloc_layer(), layer);
}

#[test]
fn argv_once_accepts_first_value_only() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (user, _sink) = join_user(&client, true);
    client.promote_pending_users();

    let values = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&values);
    assert!(client.argv.register(
        "password",
        ArgvOptions::ONCE,
        Arc::new(move |_user, _mimetype, _name, value| {
            seen.lock().push(value.to_owned());
        }),
    ));

    // First stream carries "a" (base64 "YQ==").
    dispatch(&user, &instruction("argv", &["1", "text/plain", "password"])).unwrap();
    dispatch(&user, &instruction("blob", &["1", "YQ=="])).unwrap();
    dispatch(&user, &instruction("end", &["1"])).unwrap();

    // Second stream carries "b"; accepted onto the socket, callback not
    // invoked again.
    dispatch(&user, &instruction("argv", &["2", "text/plain", "password"])).unwrap();
    dispatch(&user, &instruction("blob", &["2", "Yg=="])).unwrap();
    dispatch(&user, &instruction("end", &["2"])).unwrap();

    assert_eq!(&*values.lock(), &["a".to_owned()]);
    assert!(client.argv.await_values(&["password"]));
}

#[test]
fn argv_echo_rebroadcasts_value() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (user, sink) = join_user(&client, true);
    client.promote_pending_users();

    assert!(client.argv.register(
        "display-name",
        ArgvOptions::ECHO,
        Arc::new(|_user, _mimetype, _name, _value| {}),
    ));

    dispatch(
        &user,
        &instruction("argv", &["3", "text/plain", "display-name"]),
    )
    .unwrap();
    dispatch(&user, &instruction("blob", &["3", "ZGVzaw=="])).unwrap();
    dispatch(&user, &instruction("end", &["3"])).unwrap();

    let socket = client.socket();
    socket.flush().unwrap();
    let out = sink.contents();
    // The echoed argv stream names the parameter and carries "desk".
    assert!(out.contains("4.argv,"), "echo stream missing: {out}");
    assert!(out.contains("12.display-name"));
    assert!(out.contains("8.ZGVzaw=="));
}

#[test]
fn unregistered_argv_rejected_with_forbidden() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (user, sink) = join_user(&client, true);
    client.promote_pending_users();

    dispatch(&user, &instruction("argv", &["4", "text/plain", "nope"])).unwrap();
    user.socket().flush().unwrap();

    // ack carrying CLIENT_FORBIDDEN (0x0303 = 771).
    assert!(sink.contents().contains("3.771;"), "{}", sink.contents());
}

#[test]
fn unknown_opcodes_ignored() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (user, _sink) = join_user(&client, true);
    dispatch(&user, &instruction("frobnicate", &["1", "2"])).unwrap();
    assert!(!user.is_stopped());
}

#[test]
fn promotion_timer_activates_pending_users() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    client.start();
    let (user, _sink) = join_user(&client, true);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while !user.is_active() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert!(user.is_active(), "timer did not promote the pending user");
    client.stop();
}

#[test]
fn stop_releases_argv_waiters() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    assert!(client.argv.register(
        "hostname",
        ArgvOptions::empty(),
        Arc::new(|_, _, _, _| {}),
    ));

    let waiter_client = Arc::clone(&client);
    let waiter = std::thread::spawn(move || waiter_client.argv.await_values(&["hostname"]));
    std::thread::sleep(std::time::Duration::from_millis(20));
    client.stop();
    assert!(!waiter.join().unwrap(), "stop must release waiters");
    assert!(client.is_stopping());
}

#[test]
fn abort_emits_error_instruction() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (_user, sink) = join_user(&client, true);
    client.promote_pending_users();

    client.abort(guac_proto::Status::ServerBusy, "too many sessions");
    let out = sink.contents();
    assert!(out.contains("5.error,"), "{out}");
    assert!(out.contains("17.too many sessions"));
    assert!(out.contains("3.513;"));
}

#[test]
fn audio_stream_frames_pcm_into_blobs() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (user, sink) = join_user(&client, true);
    user.info.lock().audio_mimetypes = vec!["audio/L16".to_owned()];
    client.promote_pending_users();

    let audio = guac_client::AudioStream::new(&client, 44100, 2, 16).expect("owner accepts L16");
    let socket = client.socket();
    socket.flush().unwrap();

    let out = sink.contents();
    assert!(
        out.contains("31.audio/L16;rate=44100,channels=2"),
        "announcement missing: {out}"
    );
    sink.0.lock().clear();

    // Just over one 250 ms buffer of PCM: one full flush plus remainder.
    audio.write_pcm(&vec![0u8; 50_000]).unwrap();
    audio.flush().unwrap();
    socket.flush().unwrap();

    let bytes = sink.0.lock().clone();
    let mut parser = Parser::new();
    let mut reader = std::io::Cursor::new(bytes);
    let mut total = 0usize;
    while let Some(instruction) = parser.read_instruction(&mut reader).unwrap() {
        assert_eq!(instruction.opcode, "blob");
        let data = guac_proto::writer::decode_base64(instruction.arg(1)).unwrap();
        assert!(data.len() <= 6048, "blob too large: {}", data.len());
        total += data.len();
    }
    assert_eq!(total, 50_000);
}

#[test]
fn audio_reset_restarts_stream_on_parameter_change() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (user, sink) = join_user(&client, true);
    user.info.lock().audio_mimetypes = vec!["audio/L8".to_owned(), "audio/L16".to_owned()];
    client.promote_pending_users();

    let audio = guac_client::AudioStream::new(&client, 44100, 2, 16).unwrap();
    sink.0.lock().clear();

    // Unchanged parameters: nothing emitted.
    audio.reset(44100, 2, 16).unwrap();
    client.socket().flush().unwrap();
    assert_eq!(sink.contents(), "");

    // Changed rate: the stream ends and is re-announced.
    audio.reset(22050, 1, 8).unwrap();
    client.socket().flush().unwrap();
    let out = sink.contents();
    assert!(out.contains("3.end,"), "{out}");
    assert!(out.contains("30.audio/L8;rate=22050,channels=1"), "{out}");
}

#[test]
fn stream_png_emits_img_blob_end() {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let (_user, sink) = join_user(&client, true);
    client.promote_pending_users();

    let surface = image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 0, 0, 255]));
    let socket = client.socket();
    client
        .stream_png(
            socket.as_ref(),
            guac_proto::CompositeMode::Over,
            0,
            0,
            0,
            &surface,
        )
        .unwrap();
    socket.flush().unwrap();

    let bytes = sink.0.lock().clone();
    let mut parser = Parser::new();
    let mut reader = std::io::Cursor::new(bytes);
    let mut opcodes = Vec::new();
    while let Some(instruction) = parser.read_instruction(&mut reader).unwrap() {
        opcodes.push(instruction.opcode);
    }
    assert_eq!(opcodes.first().map(String::as_str), Some("img"));
    assert!(opcodes.iter().any(|op| op == "blob"));
    assert_eq!(opcodes.last().map(String::as_str), Some("end"));
}
