use criterion::{criterion_group, criterion_main, Criterion};
use guac_client::client::{Client, NoopSessionHandler};
use guac_client::user::User;
use guac_proto::socket::BufferedSocket;
use guac_proto::GuacSocket;
use guac_terminal::Terminal;
use std::sync::Arc;

fn session_terminal() -> (Arc<Client>, Terminal) {
    let client = Client::new(Arc::new(NoopSessionHandler), Vec::new());
    let socket: Arc<dyn GuacSocket> = Arc::new(BufferedSocket::new(std::io::sink()));
    let user = User::new(&client, socket, true);
    client.add_user(user);
    client.promote_pending_users();
    let term = Terminal::new(&client, 640, 384).unwrap();
    term.flush().unwrap();
    (client, term)
}

fn bench_scroll_flush(c: &mut Criterion) {
    let (_client, term) = session_terminal();
    // Pre-populate so scrolls move real content.
    for i in 0..24 {
        term.write(&format!("line {i:04} with some content\r\n")).unwrap();
    }
    term.flush().unwrap();

    c.bench_function("scroll_and_flush", |b| {
        b.iter(|| {
            term.write("another line of output\r\n").unwrap();
            term.flush().unwrap();
        })
    });
}

fn bench_full_repaint(c: &mut Criterion) {
    let (_client, term) = session_terminal();
    for i in 0..24 {
        term.write(&format!("line {i:04} with some content\r\n")).unwrap();
    }
    term.flush().unwrap();

    c.bench_function("full_redraw", |b| {
        b.iter(|| {
            term.redraw().unwrap();
        })
    });
}

criterion_group!(benches, bench_scroll_flush, bench_full_repaint);
criterion_main!(benches);
