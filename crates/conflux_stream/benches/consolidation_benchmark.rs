//! # Consolidation Benchmark
//!
//! Measures:
//! 1. Plain inbox -> snapshot consolidation at several item counts
//! 2. Cancellation-filtered consolidation
//! 3. A full cancellation cycle over many tracked ids

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use conflux_core::{CancelBehaviour, EntityKey, InstanceId, JobPool, OwnerId, TargetId};
use conflux_stream::{
    CancelProgressDataStream, CancelRequestDataStream, CancellableDataStream, CancellationPipeline,
    DataStream,
};

const LANES: usize = 8;

fn id(index: u32) -> InstanceId {
    InstanceId::new(OwnerId(0), TargetId(0), EntityKey::new(index, 0))
}

fn bench_consolidate(c: &mut Criterion) {
    let pool = JobPool::new(LANES);
    let mut group = c.benchmark_group("consolidate");

    for count in [1_000u32, 10_000, 100_000] {
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut stream = DataStream::<u64>::new("bench", LANES);
            b.iter(|| {
                let (fence, writer) = stream.acquire_writer();
                let per_lane = count as usize / LANES;
                let written = pool.schedule_batch(&fence, LANES, move |lane| {
                    let lane_writer = writer.lane(lane);
                    for i in 0..per_lane {
                        lane_writer.write(i as u64);
                    }
                });
                stream.release_writer(written);
                stream.consolidate(&pool).wait();
                black_box(stream.stats());
            });
        });
    }
    group.finish();
}

fn bench_filtered(c: &mut Criterion) {
    let pool = JobPool::new(4);
    let mut requests = CancelRequestDataStream::new("requests", 1);
    let mut progress = CancelProgressDataStream::new("progress");
    for index in (0..10_000).step_by(10) {
        requests.request_cancel_now(0, id(index));
    }
    requests.harden(&pool, &mut progress, &mut []).wait();

    c.bench_function("consolidate_filtered_10k", |b| {
        let mut stream = CancellableDataStream::new("bench", 1, CancelBehaviour::Default);
        b.iter(|| {
            for index in 0..10_000 {
                stream.append_now(0, id(index));
            }
            stream.consolidate(&pool, &mut requests).wait();
        });
    });
}

fn bench_cancel_cycle(c: &mut Criterion) {
    let pool = JobPool::new(4);
    c.bench_function("cancel_cycle_1k", |b| {
        let mut pipeline = CancellationPipeline::new("bench", 1);
        let mut next = 0u32;
        b.iter(|| {
            for _ in 0..1_000 {
                pipeline.requests_mut().request_cancel_now(0, id(next));
                next = next.wrapping_add(1);
            }
            pipeline.harden_requests(&pool, &mut []);
            pipeline.advance(&pool).wait();
        });
    });
}

criterion_group!(benches, bench_consolidate, bench_filtered, bench_cancel_cycle);
criterion_main!(benches);
