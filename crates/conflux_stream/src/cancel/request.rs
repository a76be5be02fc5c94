//! Request stage: a multi-writer inbox of ids hardened into a deduplicating
//! lookup once per cycle.

use std::sync::atomic::AtomicBool;

use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};

use conflux_core::{AccessControlledValue, AccessMode, AccessTicket, Dispose, Fence, InstanceId, JobPool};

use super::progress::CancelProgressDataStream;
use crate::inbox::Inbox;
use crate::lookup::Lookup;

/// Inbox plus the lookup of hardened requests (value: cycle first seen).
///
/// The inbox carries one extra lane past the producer lanes. Ids forwarded
/// from descendants arrive there and are never forwarded again.
pub(crate) struct RequestState {
    pub inbox: Inbox<InstanceId>,
    pub lookup: Lookup<u64>,
}

impl Dispose for RequestState {
    fn dispose(&mut self) {
        self.inbox.clear();
        self.lookup.dispose();
    }
}

/// First stage of the cancellation pipeline.
pub struct CancelRequestDataStream {
    name: String,
    lane_count: usize,
    state: AccessControlledValue<RequestState>,
    cycle: u64,
    last_harden: Fence,
}

impl CancelRequestDataStream {
    /// Creates a request stream with `lane_count` producer lanes.
    ///
    /// # Panics
    ///
    /// Panics if `lane_count` is zero.
    #[must_use]
    pub fn new(name: impl Into<String>, lane_count: usize) -> Self {
        assert!(lane_count > 0, "CancelRequestDataStream needs at least one lane");
        Self {
            name: name.into(),
            lane_count,
            state: AccessControlledValue::new(Self::empty_state(lane_count)),
            cycle: 0,
            last_harden: Fence::completed(),
        }
    }

    fn empty_state(lane_count: usize) -> RequestState {
        RequestState {
            inbox: Inbox::new(lane_count + 1),
            lookup: Lookup::new(),
        }
    }

    /// Stream name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Producer lanes (the propagation lane is not counted).
    #[inline]
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Harden passes scheduled so far.
    #[inline]
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Fence of the most recent harden pass.
    #[inline]
    #[must_use]
    pub fn last_harden(&self) -> &Fence {
        &self.last_harden
    }

    /// Acquires SharedWrite for issuing cancellation requests.
    pub fn acquire_writer(&mut self) -> (Fence, CancelWriter) {
        let (fence, ticket) = self.state.acquire_async(AccessMode::SharedWrite);
        let writer = CancelWriter {
            ticket,
            lane_count: self.lane_count,
        };
        (fence, writer)
    }

    /// Releases a writer acquisition.
    pub fn release_writer(&mut self, done: Fence) {
        self.state.release_async(done);
    }

    /// Acquires SharedRead for `is_cancelled` queries.
    pub fn acquire_reader(&mut self) -> (Fence, CancelReader) {
        let (fence, ticket) = self.state.acquire_async(AccessMode::SharedRead);
        (fence, CancelReader { ticket })
    }

    /// Releases a reader acquisition.
    pub fn release_reader(&mut self, done: Fence) {
        self.state.release_async(done);
    }

    /// Issues one request from the calling thread.
    pub fn request_cancel_now(&mut self, lane: usize, id: InstanceId) {
        let (fence, writer) = self.acquire_writer();
        fence.wait();
        writer.request_cancel(lane, id);
        drop(writer);
        self.release_writer(fence);
    }

    /// Whether `id` has a hardened request, from the calling thread.
    pub fn is_cancelled_now(&mut self, id: InstanceId) -> bool {
        let cancelled = self.state.acquire(AccessMode::SharedRead).lookup.contains(&id);
        self.state.release();
        cancelled
    }

    pub(crate) fn acquire_propagation(&mut self) -> (Fence, PropagationWriter) {
        let (fence, ticket) = self.state.acquire_async(AccessMode::SharedWrite);
        let writer = PropagationWriter {
            ticket,
            lane: self.lane_count,
        };
        (fence, writer)
    }

    pub(crate) fn release_propagation(&mut self, done: Fence) {
        self.state.release_async(done);
    }

    pub(crate) fn acquire_state(&mut self) -> (Fence, AccessTicket<RequestState>) {
        self.state.acquire_async(AccessMode::ExclusiveWrite)
    }

    pub(crate) fn release_state(&mut self, done: Fence) {
        self.state.release_async(done);
    }

    /// Schedules one harden pass.
    ///
    /// Drains the inbox into the lookup. Every id seen for the first time is
    /// marked in progress, and if it came from a local producer lane it is
    /// forwarded to every ancestor's propagation lane.
    pub fn harden(
        &mut self,
        pool: &JobPool,
        progress: &mut CancelProgressDataStream,
        ancestors: &mut [&mut CancelRequestDataStream],
    ) -> Fence {
        self.cycle += 1;
        let cycle = self.cycle;
        let propagation_lane = self.lane_count;

        let (own, state) = self.state.acquire_async(AccessMode::ExclusiveWrite);
        let (tracked, flags) = progress.acquire_flags();
        let mut inputs = vec![own, tracked];
        let mut forwards = Vec::with_capacity(ancestors.len());
        for ancestor in ancestors.iter_mut() {
            let (fence, writer) = ancestor.acquire_propagation();
            inputs.push(fence);
            forwards.push(writer);
        }
        let start = Fence::combine_all(&inputs);
        let name = self.name.clone();

        let done = pool.schedule(&start, move || {
            let mut state = state.write();
            let mut flags = flags.write();
            let RequestState { inbox, lookup } = &mut *state;
            let mut fresh = 0usize;

            let drained = inbox.drain_lanes(|lane, id| {
                if !lookup.try_insert(id, cycle) {
                    return;
                }
                fresh += 1;
                flags.insert(id, AtomicBool::new(true));
                if lane != propagation_lane {
                    for forward in &forwards {
                        forward.forward(id);
                    }
                }
            });
            tracing::trace!(stream = %name, cycle, drained, fresh, "cancel requests hardened");
        });

        self.state.release_async(done.clone());
        progress.release_flags(done.clone());
        for ancestor in ancestors.iter_mut() {
            ancestor.release_propagation(done.clone());
        }
        self.last_harden = done.clone();
        done
    }

    /// Waits for all prior access and frees the inbox and lookup.
    pub fn dispose(&mut self) {
        self.state.dispose();
    }

    /// Re-arms a disposed stream.
    pub fn reset(&mut self) {
        self.state
            .reset(Self::empty_state(self.lane_count), &Fence::completed());
        self.cycle = 0;
        self.last_harden = Fence::completed();
    }
}

impl std::fmt::Debug for CancelRequestDataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelRequestDataStream")
            .field("name", &self.name)
            .field("lanes", &self.lane_count)
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

/// Issues cancellation requests. Each producer sticks to its own lane.
#[derive(Clone)]
pub struct CancelWriter {
    ticket: AccessTicket<RequestState>,
    lane_count: usize,
}

impl CancelWriter {
    /// Requests cancellation of `id` from `lane`.
    ///
    /// # Panics
    ///
    /// Panics if `lane` is not a producer lane.
    pub fn request_cancel(&self, lane: usize, id: InstanceId) {
        self.lane(lane).request_cancel(id);
    }

    /// Binds the writer to one lane.
    ///
    /// # Panics
    ///
    /// Panics if `lane` is not a producer lane.
    #[must_use]
    pub fn lane(&self, lane: usize) -> LaneCancelWriter<'_> {
        assert!(
            lane < self.lane_count,
            "invalid lane: {lane} (request stream has {} producer lanes)",
            self.lane_count
        );
        LaneCancelWriter {
            state: self.ticket.read(),
            lane,
        }
    }
}

/// A [`CancelWriter`] bound to one lane.
pub struct LaneCancelWriter<'a> {
    state: RwLockReadGuard<'a, RequestState>,
    lane: usize,
}

impl LaneCancelWriter<'_> {
    /// Requests cancellation of `id`.
    #[inline]
    pub fn request_cancel(&self, id: InstanceId) {
        self.state.inbox.writer(self.lane).write(id);
    }
}

/// Answers `is_cancelled` for ids hardened in this or earlier cycles.
#[derive(Clone)]
pub struct CancelReader {
    ticket: AccessTicket<RequestState>,
}

impl CancelReader {
    /// Whether `id` has a hardened cancellation request.
    #[must_use]
    pub fn is_cancelled(&self, id: InstanceId) -> bool {
        self.ticket.read().lookup.contains(&id)
    }

    /// Number of hardened requests not yet completed.
    #[must_use]
    pub fn requested_len(&self) -> usize {
        self.ticket.read().lookup.len()
    }

    pub(crate) fn lookup(&self) -> MappedRwLockReadGuard<'_, Lookup<u64>> {
        RwLockReadGuard::map(self.ticket.read(), |state| &state.lookup)
    }
}

/// Writes forwarded ids into an ancestor's propagation lane.
pub(crate) struct PropagationWriter {
    ticket: AccessTicket<RequestState>,
    lane: usize,
}

impl PropagationWriter {
    pub fn forward(&self, id: InstanceId) {
        self.ticket.read().inbox.writer(self.lane).write(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{EntityKey, OwnerId, TargetId};

    fn id(index: u32) -> InstanceId {
        InstanceId::new(OwnerId(1), TargetId(0), EntityKey::new(index, 0))
    }

    #[test]
    fn test_harden_dedups_and_marks_progress() {
        let pool = JobPool::new(2);
        let mut requests = CancelRequestDataStream::new("requests", 2);
        let mut progress = CancelProgressDataStream::new("progress");

        requests.request_cancel_now(0, id(1));
        requests.request_cancel_now(1, id(1));
        requests.request_cancel_now(1, id(2));
        assert!(!requests.is_cancelled_now(id(1)));

        requests.harden(&pool, &mut progress, &mut []).wait();

        assert!(requests.is_cancelled_now(id(1)));
        assert!(requests.is_cancelled_now(id(2)));
        assert_eq!(progress.tracked_len(), 2);
        assert_eq!(requests.cycle(), 1);
    }

    #[test]
    fn test_already_hardened_id_not_reinserted() {
        let pool = JobPool::new(1);
        let mut requests = CancelRequestDataStream::new("requests", 1);
        let mut progress = CancelProgressDataStream::new("progress");

        requests.request_cancel_now(0, id(5));
        requests.harden(&pool, &mut progress, &mut []);
        requests.request_cancel_now(0, id(5));
        requests.harden(&pool, &mut progress, &mut []).wait();

        assert_eq!(progress.tracked_len(), 1);
    }

    #[test]
    fn test_local_requests_forward_to_ancestors() {
        let pool = JobPool::new(2);
        let mut parent = CancelRequestDataStream::new("parent", 1);
        let mut grandparent = CancelRequestDataStream::new("grandparent", 1);
        let mut child = CancelRequestDataStream::new("child", 1);
        let mut progress = CancelProgressDataStream::new("child.progress");

        child.request_cancel_now(0, id(9));
        child
            .harden(&pool, &mut progress, &mut [&mut parent, &mut grandparent])
            .wait();

        // Forwarded, but not hardened on the ancestors yet.
        assert!(!parent.is_cancelled_now(id(9)));
        let mut parent_progress = CancelProgressDataStream::new("parent.progress");
        let mut above = CancelRequestDataStream::new("above", 1);
        parent.harden(&pool, &mut parent_progress, &mut [&mut above]).wait();
        assert!(parent.is_cancelled_now(id(9)));
        assert_eq!(parent_progress.tracked_len(), 1);

        // Arrived on the propagation lane, so not forwarded again.
        let mut above_progress = CancelProgressDataStream::new("above.progress");
        above.harden(&pool, &mut above_progress, &mut []).wait();
        assert!(!above.is_cancelled_now(id(9)));
    }

    #[test]
    #[should_panic(expected = "invalid lane")]
    fn test_propagation_lane_not_writable() {
        let mut requests = CancelRequestDataStream::new("requests", 2);
        requests.request_cancel_now(2, id(1));
    }
}
