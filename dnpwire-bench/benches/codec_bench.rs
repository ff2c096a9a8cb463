//! Message build and parse benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dnpwire_protocol::{ControlCode, FeedStatus, Group, Message};

const POINT_COUNTS: [usize; 3] = [10, 50, 200];

fn analog_points(count: usize) -> Vec<[u8; 5]> {
    (0..count)
        .map(|i| {
            let [b0, b1, b2, b3] = (i as i32 * 100).to_le_bytes();
            [0x01, b0, b1, b2, b3]
        })
        .collect()
}

fn analog_response(count: usize) -> Message {
    let request = Message::request(10, 1, ControlCode::Read);
    let mut msg = Message::response_to(&request);
    let points = analog_points(count);
    let refs: Vec<&[u8]> = points.iter().map(|p| p.as_slice()).collect();
    msg.add_points(Group::ANALOG_INPUT, 1, 0, &refs).unwrap();
    msg.build().unwrap();
    msg
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_build");

    for count in POINT_COUNTS {
        let points = analog_points(count);
        let refs: Vec<&[u8]> = points.iter().map(|p| p.as_slice()).collect();
        let request = Message::request(10, 1, ControlCode::Read);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &refs, |b, refs| {
            b.iter(|| {
                let mut msg = Message::response_to(&request);
                msg.add_points(Group::ANALOG_INPUT, 1, 0, refs).unwrap();
                msg.build().unwrap();
                black_box(msg.wire().len())
            });
        });
    }

    group.finish();
}

fn bench_feed(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_feed");

    for count in POINT_COUNTS {
        let wire = analog_response(count).wire().to_vec();

        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &wire, |b, wire| {
            let mut msg = Message::new();
            b.iter(|| {
                msg.reset();
                let feed = msg.feed(black_box(wire));
                assert_eq!(feed.status, FeedStatus::Complete);
            });
        });
    }

    group.finish();
}

fn bench_feed_bytewise(c: &mut Criterion) {
    let wire = analog_response(50).wire().to_vec();

    c.bench_function("message_feed_bytewise", |b| {
        let mut msg = Message::new();
        b.iter(|| {
            msg.reset();
            for byte in wire.chunks(1) {
                msg.feed(black_box(byte));
            }
            assert!(msg.is_complete());
        });
    });
}

fn bench_decode_objects(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_objects");

    for count in POINT_COUNTS {
        let mut msg = Message::new();
        let feed = msg.feed(analog_response(count).wire());
        assert_eq!(feed.status, FeedStatus::Complete);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::from_parameter(count), |b| {
            b.iter(|| {
                msg.rewind();
                black_box(msg.decode_objects().unwrap().len())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build,
    bench_feed,
    bench_feed_bytewise,
    bench_decode_objects
);
criterion_main!(benches);
