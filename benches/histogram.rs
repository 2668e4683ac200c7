use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sbk_perf::{Channel, ChannelReader, ChannelSender, LatencyHistogram};
use std::sync::Arc;

const OPS_PER_ITER: u64 = 10_000;
const PERCENTILES: [f64; 8] = [0.10, 0.25, 0.50, 0.75, 0.95, 0.99, 0.999, 0.9999];

// Xorshift so every run records the same latency sequence.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

fn make_latencies(count: usize, max: u64, seed: u64) -> Vec<u64> {
    let mut rng = XorShift64::new(seed);
    (0..count).map(|_| rng.next_u64() % max).collect()
}

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram/record");
    group.throughput(Throughput::Elements(OPS_PER_ITER));
    let latencies = make_latencies(OPS_PER_ITER as usize, 1_000, 0xdead_beef);

    group.bench_function("uniform_1000", |b| {
        let mut hist = LatencyHistogram::new(0, 60_000).unwrap();
        b.iter(|| {
            for &latency in &latencies {
                hist.record(1024, 1, black_box(latency));
            }
        })
    });

    group.finish();
}

// Extraction cost grows with the highest observed latency, not the bucket count.
fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram/extract_and_clear");

    for max in [100u64, 10_000, 180_000] {
        let latencies = make_latencies(OPS_PER_ITER as usize, max, 0x5eed);
        group.bench_with_input(BenchmarkId::from_parameter(max), &latencies, |b, latencies| {
            let mut hist = LatencyHistogram::new(0, 180_000).unwrap();
            b.iter(|| {
                for &latency in latencies {
                    hist.record(1024, 1, latency);
                }
                let values = hist.extract_and_clear(black_box(&PERCENTILES));
                hist.reset();
                values
            })
        });
    }

    group.finish();
}

fn bench_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel/send_receive");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    for shards in [1usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(shards), &shards, |b, &shards| {
            let channel = Arc::new(Channel::new(shards).unwrap());
            let senders: Vec<ChannelSender> = (0..shards)
                .map(|s| ChannelSender::new(channel.clone(), s))
                .collect();
            let mut reader = ChannelReader::new(channel);
            b.iter(|| {
                for i in 0..OPS_PER_ITER {
                    senders[i as usize % shards].send(1024, 1, i, i + 3);
                }
                let mut received = 0u64;
                while reader.receive_any().is_some() {
                    received += 1;
                }
                black_box(received)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record, bench_extract, bench_channel);
criterion_main!(benches);
