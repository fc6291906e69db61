use criterion::{criterion_group, criterion_main, Criterion};
use guac_proto::parser::Parser;
use guac_proto::protocol::send_copy;
use guac_proto::socket::BufferedSocket;
use guac_proto::types::CompositeMode;
use std::hint::black_box;

fn bench_encode(c: &mut Criterion) {
    c.bench_function("encode_copy", |b| {
        b.iter(|| {
            let socket = BufferedSocket::new(std::io::sink());
            for i in 0..100 {
                send_copy(
                    &socket,
                    0,
                    black_box(i),
                    0,
                    640,
                    16,
                    CompositeMode::Over,
                    0,
                    0,
                    black_box(i * 16),
                )
                .unwrap();
            }
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let frame: Vec<u8> = b"4.copy,1.0,1.0,1.0,3.640,2.16,2.14,1.0,1.0,3.160;"
        .iter()
        .cycle()
        .take(49 * 100)
        .copied()
        .collect();
    c.bench_function("decode_copy", |b| {
        b.iter(|| {
            let mut parser = Parser::new();
            let mut offset = 0;
            while offset < frame.len() {
                let (consumed, instruction) = parser.feed(&frame[offset..]).unwrap();
                offset += consumed;
                black_box(instruction);
            }
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
