//! Codec benchmarks for rooms-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rooms_protocol::{codec, BulkDelete, Frame, Message, User};

fn message_frame(body_len: usize) -> Frame {
    let sender = User::new("u1", "alice");
    Frame::room_message(Message::new("m1", "GENERAL", sender, "x".repeat(body_len)))
}

fn bench_encode_message(c: &mut Criterion) {
    let frame = message_frame(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("room_message_64B", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let encoded = codec::encode(&message_frame(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("room_message_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_bulk_delete_roundtrip(c: &mut Criterion) {
    let frame = Frame::delete_bulk(
        BulkDelete::new("GENERAL", 1_700_000_000_000)
            .exclude_pinned()
            .from_users(["alice", "bob", "carol"]),
    );

    c.bench_function("roundtrip_bulk_delete", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_message,
    bench_decode_message,
    bench_bulk_delete_roundtrip
);
criterion_main!(benches);
