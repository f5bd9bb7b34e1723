//! 재조립 처리량 벤치마크

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use roundsend::packet::{HeaderFormat, Packet};
use roundsend::{Config, MemorySinkFactory, SessionTable, Sender, Subscription};

const STREAM_ID: u32 = 1;

fn packets(size: usize) -> Vec<Packet> {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    Sender::new(Config::default(), STREAM_ID).packets_for(&data)
}

fn table() -> SessionTable {
    SessionTable::new(
        Subscription::only([STREAM_ID]),
        Box::new(MemorySinkFactory::new()),
        Duration::from_secs(10),
    )
}

fn bench_reassembly(c: &mut Criterion) {
    let size = 4 * 1024 * 1024;
    let in_order = packets(size);

    // 인접한 두 패킷씩 뒤집어 매번 버퍼를 거치게 함
    let mut swapped = in_order.clone();
    for pair in swapped.chunks_mut(2) {
        pair.reverse();
    }

    let mut reversed = in_order.clone();
    reversed.reverse();

    let mut group = c.benchmark_group("reassembly");
    group.throughput(Throughput::Bytes(size as u64));

    for (name, input) in [
        ("in_order", &in_order),
        ("pair_swapped", &swapped),
        ("reversed", &reversed),
    ] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || (table(), input.clone()),
                |(mut table, input)| {
                    let now = Instant::now();
                    for packet in input {
                        table.route(packet, now);
                    }
                    black_box(table.all_resolved())
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let packet = packets(1200).remove(0);
    let wire = packet.encode(HeaderFormat::MultiStream).unwrap();

    c.bench_function("decode_multistream", |b| {
        b.iter(|| Packet::decode(HeaderFormat::MultiStream, black_box(&wire)).unwrap())
    });
}

criterion_group!(benches, bench_reassembly, bench_decode);
criterion_main!(benches);
