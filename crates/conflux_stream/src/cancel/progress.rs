//! Progress stage: one flag per hardened id, aged once per cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use conflux_core::{AccessControlledValue, AccessMode, AccessTicket, Fence, InstanceId, JobPool};

use super::complete::CancelCompleteDataStream;
use super::request::CancelRequestDataStream;
use crate::lookup::Lookup;

/// Second stage of the cancellation pipeline.
///
/// A flag of `true` means some job still needs a cycle for the id. Each
/// [`update`](Self::update) flips `true` to `false`, and removes ids that
/// were already `false` and hands them to the complete stage.
pub struct CancelProgressDataStream {
    name: String,
    flags: AccessControlledValue<Lookup<AtomicBool>>,
    completed: Arc<AtomicU64>,
    last_update: Fence,
}

impl CancelProgressDataStream {
    /// Creates an empty progress stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: AccessControlledValue::default(),
            completed: Arc::new(AtomicU64::new(0)),
            last_update: Fence::completed(),
        }
    }

    /// Stage name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ids completed over the lifetime of this stage.
    #[must_use]
    pub fn completed_total(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Fence of the most recent update pass.
    #[inline]
    #[must_use]
    pub fn last_update(&self) -> &Fence {
        &self.last_update
    }

    /// Acquires SharedWrite for jobs that claim ids.
    pub fn acquire_claimer(&mut self) -> (Fence, ProgressClaimer) {
        let (fence, ticket) = self.flags.acquire_async(AccessMode::SharedWrite);
        (fence, ProgressClaimer { ticket })
    }

    /// Releases a claimer acquisition.
    pub fn release_claimer(&mut self, done: Fence) {
        self.flags.release_async(done);
    }

    /// Claims `id` from the calling thread.
    pub fn claim_now(&mut self, id: InstanceId) -> bool {
        let (fence, claimer) = self.acquire_claimer();
        fence.wait();
        let claimed = claimer.claim(id);
        drop(claimer);
        self.release_claimer(fence);
        claimed
    }

    /// Number of ids still in progress, from the calling thread.
    pub fn tracked_len(&mut self) -> usize {
        let len = self.flags.acquire(AccessMode::SharedRead).len();
        self.flags.release();
        len
    }

    /// Whether `id` is still in progress, from the calling thread.
    pub fn is_tracked(&mut self, id: InstanceId) -> bool {
        let tracked = self.flags.acquire(AccessMode::SharedRead).contains(&id);
        self.flags.release();
        tracked
    }

    pub(crate) fn acquire_flags(&mut self) -> (Fence, AccessTicket<Lookup<AtomicBool>>) {
        self.flags.acquire_async(AccessMode::ExclusiveWrite)
    }

    pub(crate) fn release_flags(&mut self, done: Fence) {
        self.flags.release_async(done);
    }

    /// Schedules one aging pass over every tracked id.
    ///
    /// Ids that complete leave the request lookup in the same pass, so a
    /// later request for the same id starts a fresh cancellation.
    pub fn update(
        &mut self,
        pool: &JobPool,
        requests: &mut CancelRequestDataStream,
        complete: &mut CancelCompleteDataStream,
    ) -> Fence {
        let (own, flags) = self.flags.acquire_async(AccessMode::ExclusiveWrite);
        let (requested, state) = requests.acquire_state();
        let (completing, writer) = complete.acquire_writer();
        let start = Fence::combine_all([&own, &requested, &completing]);
        let completed = Arc::clone(&self.completed);
        let name = self.name.clone();

        let done = pool.schedule(&start, move || {
            let mut flags = flags.write();
            let mut state = state.write();
            let out = writer.lane(0);
            let mut finished = 0u64;

            flags.retain(|id, flag| {
                let claimed = flag.get_mut();
                if *claimed {
                    *claimed = false;
                    return true;
                }
                state.lookup.remove(id);
                out.write(*id);
                finished += 1;
                false
            });
            completed.fetch_add(finished, Ordering::Relaxed);
            tracing::trace!(stream = %name, finished, remaining = flags.len(), "cancel progress updated");
        });

        self.flags.release_async(done.clone());
        requests.release_state(done.clone());
        complete.release_writer(done.clone());
        self.last_update = done.clone();
        done
    }

    /// Waits for all prior access and drops every tracked id.
    pub fn dispose(&mut self) {
        self.flags.dispose();
    }

    /// Re-arms a disposed stage.
    pub fn reset(&mut self) {
        self.flags.reset(Lookup::new(), &Fence::completed());
        self.last_update = Fence::completed();
    }
}

impl std::fmt::Debug for CancelProgressDataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelProgressDataStream")
            .field("name", &self.name)
            .field("completed", &self.completed_total())
            .finish_non_exhaustive()
    }
}

/// Lets in-flight jobs keep an id in progress for another cycle.
#[derive(Clone)]
pub struct ProgressClaimer {
    ticket: AccessTicket<Lookup<AtomicBool>>,
}

impl ProgressClaimer {
    /// Marks `id` as still being worked on. Returns false if `id` is not in
    /// progress (never requested, or already complete).
    pub fn claim(&self, id: InstanceId) -> bool {
        match self.ticket.read().get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{EntityKey, OwnerId, TargetId};

    fn id(index: u32) -> InstanceId {
        InstanceId::new(OwnerId(0), TargetId(3), EntityKey::new(index, 1))
    }

    struct Stages {
        pool: JobPool,
        requests: CancelRequestDataStream,
        progress: CancelProgressDataStream,
        complete: CancelCompleteDataStream,
    }

    impl Stages {
        fn new() -> Self {
            Self {
                pool: JobPool::new(2),
                requests: CancelRequestDataStream::new("requests", 1),
                progress: CancelProgressDataStream::new("progress"),
                complete: CancelCompleteDataStream::new("complete"),
            }
        }

        fn cycle(&mut self) {
            self.requests.harden(&self.pool, &mut self.progress, &mut []);
            self.progress
                .update(&self.pool, &mut self.requests, &mut self.complete);
            self.complete.consolidate(&self.pool).wait();
        }
    }

    #[test]
    fn test_unclaimed_id_completes() {
        let mut stages = Stages::new();
        stages.requests.request_cancel_now(0, id(1));

        stages.cycle();
        assert!(stages.progress.is_tracked(id(1)));
        assert!(!stages.complete.contains_now(id(1)));

        stages.cycle();
        assert!(!stages.progress.is_tracked(id(1)));
        assert!(!stages.requests.is_cancelled_now(id(1)));
        assert!(stages.complete.contains_now(id(1)));
        assert_eq!(stages.progress.completed_total(), 1);
    }

    #[test]
    fn test_claimed_id_stays_in_progress() {
        let mut stages = Stages::new();
        stages.requests.request_cancel_now(0, id(2));
        stages.cycle();

        for _ in 0..5 {
            assert!(stages.progress.claim_now(id(2)));
            stages.cycle();
            assert!(stages.progress.is_tracked(id(2)));
            assert!(!stages.complete.contains_now(id(2)));
        }

        stages.cycle();
        assert!(stages.complete.contains_now(id(2)));
    }

    #[test]
    fn test_claim_unknown_id() {
        let mut progress = CancelProgressDataStream::new("progress");
        assert!(!progress.claim_now(id(42)));
    }
}
