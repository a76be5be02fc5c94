//! Property tests for the access controller ordering rules.
//!
//! Run with: cargo test -p conflux_core --test access_properties

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conflux_core::{
    AccessControlledValue, AccessController, AccessMode, Fence, FenceTrigger, JobPool,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MODES: [AccessMode; 3] = [
    AccessMode::ExclusiveWrite,
    AccessMode::SharedWrite,
    AccessMode::SharedRead,
];

fn compatible(a: AccessMode, b: AccessMode) -> bool {
    matches!(
        (a, b),
        (AccessMode::SharedWrite, AccessMode::SharedWrite)
            | (AccessMode::SharedRead, AccessMode::SharedRead)
    )
}

struct Record {
    mode: AccessMode,
    acquired: Fence,
    done: Fence,
}

/// Runs `steps` random acquisitions on `ctrl`, every job left pending, so
/// fence dependencies are the only ordering.
fn drive(
    ctrl: &mut AccessController,
    rng: &mut StdRng,
    steps: usize,
    records: &mut Vec<Record>,
    triggers: &mut Vec<FenceTrigger>,
) {
    for _ in 0..steps {
        let mode = MODES[rng.gen_range(0..MODES.len())];
        let acquired = ctrl.acquire(mode);
        let (done, trigger) = FenceTrigger::with_dependency(&acquired);
        ctrl.release(done.clone());
        records.push(Record {
            mode,
            acquired,
            done,
        });
        triggers.push(trigger);
    }
}

fn random_history(seed: u64, steps: usize) -> (Vec<Record>, Vec<FenceTrigger>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ctrl = AccessController::new();
    let mut records = Vec::with_capacity(steps);
    let mut triggers = Vec::with_capacity(steps);
    drive(&mut ctrl, &mut rng, steps, &mut records, &mut triggers);
    (records, triggers)
}

#[test]
fn incompatible_acquisitions_never_overlap() {
    for seed in 0..32 {
        let (records, triggers) = random_history(seed, 40);

        for (j, later) in records.iter().enumerate() {
            for earlier in &records[..j] {
                if !compatible(earlier.mode, later.mode) {
                    assert!(
                        later.acquired.depends_on(&earlier.done),
                        "seed {seed}: {:?} acquired after {:?} must wait for it",
                        later.mode,
                        earlier.mode
                    );
                }
            }
        }
        drop(triggers);
    }
}

#[test]
fn compatible_runs_stay_concurrent() {
    for seed in 0..32 {
        let (records, triggers) = random_history(seed, 40);

        // Within an unbroken run of one shared mode, nobody waits on a peer.
        for window in records.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            if a.mode == b.mode && a.mode != AccessMode::ExclusiveWrite {
                assert!(
                    !b.acquired.depends_on(&a.done),
                    "seed {seed}: consecutive {:?} acquisitions must not serialize",
                    a.mode
                );
            }
        }
        drop(triggers);
    }
}

#[test]
fn every_fence_resolves_once_all_work_is_done() {
    let mut rng = StdRng::seed_from_u64(7);
    let (records, mut triggers) = random_history(99, 60);

    while !triggers.is_empty() {
        let index = rng.gen_range(0..triggers.len());
        triggers.swap_remove(index).fire();
    }
    for record in &records {
        assert!(record.done.is_complete());
        assert!(record.acquired.is_complete());
    }
}

#[test]
fn disposal_waits_for_every_prior_access() {
    for seed in 0..32 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ctrl = AccessController::new();
        let (mut records, mut triggers) = (Vec::new(), Vec::new());
        drive(&mut ctrl, &mut rng, 40, &mut records, &mut triggers);

        let disposal = ctrl.acquire(AccessMode::Disposal);
        assert!(ctrl.is_disposing());
        for (i, record) in records.iter().enumerate() {
            assert!(
                disposal.depends_on(&record.done),
                "seed {seed}: disposal must wait for {:?} #{i}",
                record.mode
            );
        }
        drop(triggers);
    }
}

#[test]
fn acquisitions_after_reset_wait_for_disposed_era() {
    for seed in 0..32 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ctrl = AccessController::new();
        let (mut before, mut triggers) = (Vec::new(), Vec::new());
        drive(&mut ctrl, &mut rng, 20, &mut before, &mut triggers);

        let _disposal = ctrl.acquire(AccessMode::Disposal);
        ctrl.reset(&Fence::completed());

        let mut after = Vec::new();
        drive(&mut ctrl, &mut rng, 20, &mut after, &mut triggers);
        for later in &after {
            for earlier in &before {
                assert!(
                    later.acquired.depends_on(&earlier.done),
                    "seed {seed}: {:?} after reset must wait for {:?} before disposal",
                    later.mode,
                    earlier.mode
                );
            }
        }
        drop(triggers);
    }
}

#[test]
fn long_chain_of_shared_releases_resolves() {
    const RELEASES: usize = 100_000;
    let mut ctrl = AccessController::new();
    let mut triggers = Vec::with_capacity(RELEASES);

    for _ in 0..RELEASES {
        let acquired = ctrl.acquire(AccessMode::SharedRead);
        let (done, trigger) = FenceTrigger::with_dependency(&acquired);
        ctrl.release(done);
        triggers.push(trigger);
    }
    let exclusive = ctrl.acquire(AccessMode::ExclusiveWrite);
    ctrl.release(exclusive.clone());

    // Everyone but the first reader finishes, then the first one does.
    let first = triggers.remove(0);
    for trigger in triggers.into_iter().rev() {
        trigger.fire();
    }
    assert!(!exclusive.is_complete());
    first.fire();
    assert!(exclusive.is_complete());
}

#[test]
fn shared_write_release_leaves_writer_frontier_alone() {
    let mut ctrl = AccessController::new();

    // Several writers outstanding at once.
    let writers: Vec<(Fence, FenceTrigger)> = (0..4)
        .map(|_| {
            let acquired = ctrl.acquire(AccessMode::SharedWrite);
            assert!(acquired.is_complete(), "no writer waits on another writer");
            let (done, trigger) = FenceTrigger::with_dependency(&acquired);
            ctrl.release(done.clone());
            (done, trigger)
        })
        .collect();

    // A reader must wait for every one of them.
    let read = ctrl.acquire(AccessMode::SharedRead);
    for (done, _) in &writers {
        assert!(read.depends_on(done));
    }
    ctrl.release(read.clone());

    // And so must the next exclusive writer, which also waits on the reader.
    let exclusive = ctrl.acquire(AccessMode::ExclusiveWrite);
    assert!(exclusive.depends_on(&read));
    ctrl.release(exclusive.clone());

    for (_, trigger) in writers {
        trigger.fire();
    }
    assert!(exclusive.wait_timeout(Duration::from_secs(1)));
}

#[test]
fn unreleased_work_blocks_later_acquisitions() {
    let mut ctrl = AccessController::new();
    let acquired = ctrl.acquire(AccessMode::ExclusiveWrite);
    let (never, _held_forever) = FenceTrigger::with_dependency(&acquired);
    ctrl.release(never);

    let next = ctrl.acquire(AccessMode::SharedRead);
    assert!(!next.wait_timeout(Duration::from_millis(50)));
    ctrl.release(next);
}

#[test]
fn reset_after_disposal_starts_clean() {
    let mut value = AccessControlledValue::new(vec![1u32, 2, 3]);
    value.dispose();
    assert!(value.controller().is_disposing());

    value.reset(Vec::new(), &Fence::completed());
    assert!(!value.controller().is_disposing());
    assert!(value.acquire(AccessMode::SharedRead).is_empty());
    value.release();
}

/// Real workers hammering one value under every mode. Any overlap shows up
/// as a failed non-blocking redemption.
#[test]
fn concurrent_jobs_respect_modes() {
    let pool = JobPool::new(4);
    let lanes = 4;
    let mut value = AccessControlledValue::new((0..lanes).map(|_| AtomicU64::new(0)).collect::<Vec<_>>());
    let violated = Arc::new(AtomicBool::new(false));
    let mut rng = StdRng::seed_from_u64(2024);
    let mut last = Fence::completed();

    for _ in 0..200 {
        let mode = MODES[rng.gen_range(0..MODES.len())];
        let (fence, ticket) = value.acquire_async(mode);
        let flag = Arc::clone(&violated);
        let done = match mode {
            AccessMode::SharedWrite => pool.schedule_batch(&fence, lanes, move |lane| {
                match ticket.try_read() {
                    Ok(counters) => {
                        counters[lane].fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => flag.store(true, Ordering::SeqCst),
                }
            }),
            AccessMode::SharedRead => pool.schedule(&fence, move || {
                if ticket.try_read().is_err() {
                    flag.store(true, Ordering::SeqCst);
                }
            }),
            _ => pool.schedule(&fence, move || match ticket.try_write() {
                Ok(mut counters) => {
                    for counter in counters.iter_mut() {
                        *counter.get_mut() += 1;
                    }
                }
                Err(_) => flag.store(true, Ordering::SeqCst),
            }),
        };
        value.release_async(done.clone());
        last = Fence::combine(&last, &done);
    }

    assert!(last.wait_timeout(Duration::from_secs(10)));
    assert!(!violated.load(Ordering::SeqCst), "an access overlapped an incompatible one");
}
