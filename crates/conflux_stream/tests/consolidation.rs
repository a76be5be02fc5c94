//! Integration tests for inbox/snapshot consolidation.
//!
//! Run with: cargo test -p conflux_stream --test consolidation

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use conflux_core::{
    CancelBehaviour, EntityKey, Fence, InstanceId, JobPool, OwnerId, Tagged, TargetId,
};
use conflux_stream::{
    CancelProgressDataStream, CancelRequestDataStream, CancellableDataStream, ConsolidationState,
    DataStream,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn id(index: u32) -> InstanceId {
    InstanceId::new(OwnerId(0), TargetId(0), EntityKey::new(index, 0))
}

#[test]
fn two_lanes_consolidate_into_one_snapshot() {
    let pool = JobPool::new(2);
    let mut stream = DataStream::new("letters", 2);

    let (fence, writer) = stream.acquire_writer();
    let written = pool.schedule_batch(&fence, 2, move |lane| {
        let items: &[char] = if lane == 0 { &['A', 'B'] } else { &['C'] };
        let lane_writer = writer.lane(lane);
        for &item in items {
            lane_writer.write(item);
        }
    });
    stream.release_writer(written);

    stream.consolidate(&pool).wait();

    assert_eq!(stream.consolidation_state(), ConsolidationState::Idle);
    assert_eq!(stream.pending_len(), 0);
    stream.with_snapshot(|snapshot| {
        assert_eq!(snapshot.len(), 3);
        let mut items = snapshot.as_slice().to_vec();
        items.sort_unstable();
        assert_eq!(items, vec!['A', 'B', 'C']);
        // Order within a lane survives.
        let a = snapshot.iter().position(|c| *c == 'A');
        let b = snapshot.iter().position(|c| *c == 'B');
        assert!(a < b);
    });
}

#[test]
fn snapshot_size_matches_appended_minus_filtered() {
    let pool = JobPool::new(4);
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..8 {
        let lanes = rng.gen_range(1..5);
        let appended = rng.gen_range(0..200u32);
        let cancelled: Vec<u32> = (0..appended).filter(|_| rng.gen_bool(0.25)).collect();

        let mut requests = CancelRequestDataStream::new("requests", 1);
        let mut progress = CancelProgressDataStream::new("progress");
        for &index in &cancelled {
            requests.request_cancel_now(0, id(index));
        }
        requests.harden(&pool, &mut progress, &mut []);

        let mut stream = CancellableDataStream::new("items", lanes, CancelBehaviour::Default);
        for index in 0..appended {
            stream.append_now(index as usize % lanes, id(index));
        }
        stream.consolidate(&pool, &mut requests).wait();

        let expected = appended as usize - cancelled.len();
        assert_eq!(stream.with_snapshot(|s| s.len()), expected);
        assert_eq!(stream.stats().dropped, cancelled.len() as u64);
        assert_eq!(stream.stream_mut().pending_len(), 0);
    }
}

#[test]
fn explicit_redirect_keeps_payload() {
    let pool = JobPool::new(2);
    let mut requests = CancelRequestDataStream::new("requests", 1);
    let mut progress = CancelProgressDataStream::new("progress");
    requests.request_cancel_now(0, id(2));
    requests.harden(&pool, &mut progress, &mut []);

    let mut stream = CancellableDataStream::new("orders", 1, CancelBehaviour::Explicit);
    stream.append_now(0, Tagged::new(id(1), "move"));
    stream.append_now(0, Tagged::new(id(2), "attack"));
    stream.consolidate(&pool, &mut requests).wait();

    let kept = stream.with_snapshot(|s| s.iter().map(|t| t.payload).collect::<Vec<_>>());
    assert_eq!(kept, vec!["move"]);
    let pending = stream.pending_cancel_mut().unwrap();
    let redirected = pending.with_snapshot(|s| s.iter().map(|t| t.payload).collect::<Vec<_>>());
    assert_eq!(redirected, vec!["attack"]);
}

#[test]
fn readers_wait_for_consolidation_and_writers_wait_for_readers() {
    let pool = JobPool::new(4);
    let mut stream = DataStream::new("ordered", 1);
    let consolidated = Arc::new(AtomicBool::new(false));
    let read_seen = Arc::new(AtomicUsize::new(usize::MAX));

    stream.append_now(0, 1u32);
    stream.append_now(0, 2u32);
    let consolidation = stream.consolidate(&pool);
    {
        let flag = Arc::clone(&consolidated);
        let marker = pool.schedule(&consolidation, move || flag.store(true, Ordering::SeqCst));
        marker.wait();
    }

    let (fence, reader) = stream.acquire_reader();
    assert!(fence.depends_on(&consolidation));
    let seen = Arc::clone(&read_seen);
    let read = pool.schedule(&fence, move || seen.store(reader.len(), Ordering::SeqCst));
    stream.release_reader(read.clone());

    let (write_fence, _writer) = stream.acquire_writer();
    assert!(write_fence.depends_on(&read));
    stream.release_writer(write_fence);

    Fence::combine(&read, stream.last_consolidation()).wait();
    assert!(consolidated.load(Ordering::SeqCst));
    assert_eq!(read_seen.load(Ordering::SeqCst), 2);
}
