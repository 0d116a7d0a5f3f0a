//! 프레임 코덱 / 체크섬 / 저장소 벤치마크

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rftp::{fletcher8, Packet, PacketStore, RetransmitRequest, PAYLOAD_WIDTH};

fn bench_frame_codec(c: &mut Criterion) {
    let payload = [0xA5u8; PAYLOAD_WIDTH];
    let data = Packet::data(1234, &payload);
    let ids: Vec<u16> = (1..=13).collect();
    let request = Packet::RetransmitRequest(RetransmitRequest::batch(1, &ids).remove(0));

    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Bytes(32));

    for (name, packet) in [("data", &data), ("request", &request)] {
        let frame = packet.encode();
        group.bench_with_input(BenchmarkId::new("encode", name), packet, |b, packet| {
            b.iter(|| black_box(packet).encode())
        });
        group.bench_with_input(BenchmarkId::new("decode", name), &frame, |b, frame| {
            b.iter(|| Packet::decode(black_box(frame)))
        });
    }

    group.finish();
}

fn bench_fletcher8(c: &mut Criterion) {
    let payload = [0x5Au8; PAYLOAD_WIDTH];
    c.bench_function("fletcher8/29", |b| b.iter(|| fletcher8(black_box(&payload))));
}

fn bench_store(c: &mut Criterion) {
    let size = 29 * 4096;
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Bytes(size as u64));

    group.bench_function("fill_and_assemble", |b| {
        b.iter(|| {
            let mut store = PacketStore::for_file(size as u64).expect("size within limit");
            for (idx, chunk) in data.chunks(PAYLOAD_WIDTH).enumerate() {
                let _ = store.put(idx as u16 + 1, chunk);
            }
            black_box(store.assemble(store.expected_count()))
        })
    });

    group.bench_function("missing_scan", |b| {
        let mut store = PacketStore::for_file(size as u64).expect("size within limit");
        for (idx, chunk) in data.chunks(PAYLOAD_WIDTH).enumerate().step_by(3) {
            let _ = store.put(idx as u16 + 1, chunk);
        }
        b.iter(|| black_box(store.missing(store.expected_count())))
    });

    group.finish();
}

criterion_group!(benches, bench_frame_codec, bench_fletcher8, bench_store);
criterion_main!(benches);
