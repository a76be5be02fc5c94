//! # Data Stream
//!
//! Inbox + Snapshot joined once per cycle by a consolidation job.
//!
//! ```text
//!   producers (SharedWrite)          consolidator (ExclusiveWrite)       readers (SharedRead)
//!   lane 0 ─┐                        clear snapshot                      snapshot[i]
//!   lane 1 ─┼──> Inbox ──────────>   reserve count(inbox)      ──────>   snapshot.len()
//!   lane N ─┘                        drain lanes into snapshot
//! ```
//!
//! All three phases go through the stream's access controller, so one cycle
//! looks like: writers release, the consolidation job waits on every writer,
//! readers wait on the consolidation job, and the next cycle's writers wait
//! on every reader.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut stream = DataStream::<u32>::new("damage", pool.worker_count());
//!
//! let (fence, writer) = stream.acquire_writer();
//! let done = pool.schedule_batch(&fence, lanes, move |lane| writer.write(lane, 1));
//! stream.release_writer(done);
//!
//! stream.consolidate(&pool);
//! stream.with_snapshot(|snapshot| assert_eq!(snapshot.len(), lanes));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};

use conflux_core::{AccessControlledValue, AccessMode, AccessTicket, Dispose, Fence, JobPool};

use crate::inbox::Inbox;
use crate::snapshot::Snapshot;

/// Where the consolidator sends one inbox item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    /// Copy into the snapshot.
    Keep,
    /// Discard.
    Drop,
    /// Hand to the redirect sink.
    Redirect,
}

/// Item counts from one consolidation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ConsolidationOutcome {
    pub kept: u64,
    pub dropped: u64,
    pub redirected: u64,
}

/// The two buffers of a stream, guarded together.
pub(crate) struct StreamBuffers<T> {
    pub inbox: Inbox<T>,
    pub snapshot: Snapshot<T>,
}

impl<T> StreamBuffers<T> {
    fn new(lane_count: usize) -> Self {
        Self {
            inbox: Inbox::new(lane_count),
            snapshot: Snapshot::default(),
        }
    }

    /// Rebuilds the snapshot from the inbox, routing every item exactly once.
    pub fn consolidate_routed(
        &mut self,
        mut route: impl FnMut(&T) -> Route,
        mut redirect: impl FnMut(T),
    ) -> ConsolidationOutcome {
        let Self { inbox, snapshot } = self;
        let mut outcome = ConsolidationOutcome::default();

        snapshot.begin_rebuild(inbox.len());
        inbox.drain_lanes(|_, item| match route(&item) {
            Route::Keep => {
                snapshot.push(item);
                outcome.kept += 1;
            }
            Route::Drop => outcome.dropped += 1,
            Route::Redirect => {
                redirect(item);
                outcome.redirected += 1;
            }
        });
        outcome
    }
}

impl<T> Dispose for StreamBuffers<T> {
    fn dispose(&mut self) {
        self.inbox.clear();
        self.snapshot.release_memory();
    }
}

/// Whether a consolidation job is still in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsolidationState {
    /// No consolidation pending; the snapshot is stable.
    Idle,
    /// A consolidation job has been scheduled and not yet finished.
    Consolidating,
}

/// Running totals for a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsolidationStats {
    /// Consolidation passes finished.
    pub cycles: u64,
    /// Items copied into a snapshot.
    pub consolidated: u64,
    /// Items dropped because their instance was cancelled.
    pub dropped: u64,
    /// Items redirected to a pending-cancel stream.
    pub redirected: u64,
}

#[derive(Default)]
struct StatCounters {
    cycles: AtomicU64,
    consolidated: AtomicU64,
    dropped: AtomicU64,
    redirected: AtomicU64,
}

impl StatCounters {
    fn record(&self, outcome: ConsolidationOutcome) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.consolidated.fetch_add(outcome.kept, Ordering::Relaxed);
        self.dropped.fetch_add(outcome.dropped, Ordering::Relaxed);
        self.redirected.fetch_add(outcome.redirected, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConsolidationStats {
        ConsolidationStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            consolidated: self.consolidated.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            redirected: self.redirected.load(Ordering::Relaxed),
        }
    }
}

/// A multi-lane inbox consolidated into a flat snapshot once per cycle.
pub struct DataStream<T> {
    name: String,
    lane_count: usize,
    buffers: AccessControlledValue<StreamBuffers<T>>,
    last_consolidation: Fence,
    stats: Arc<StatCounters>,
}

impl<T> DataStream<T> {
    /// Creates an empty stream with `lane_count` inbox lanes.
    ///
    /// # Panics
    ///
    /// Panics if `lane_count` is zero.
    #[must_use]
    pub fn new(name: impl Into<String>, lane_count: usize) -> Self {
        Self {
            name: name.into(),
            lane_count,
            buffers: AccessControlledValue::new(StreamBuffers::new(lane_count)),
            last_consolidation: Fence::completed(),
            stats: Arc::new(StatCounters::default()),
        }
    }

    /// Stream name, used in logs and registry lookups.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of inbox lanes.
    #[inline]
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Acquires SharedWrite for producers. Every producer must stick to its
    /// own lane.
    pub fn acquire_writer(&mut self) -> (Fence, StreamWriter<T>) {
        let (fence, ticket) = self.buffers.acquire_async(AccessMode::SharedWrite);
        (fence, StreamWriter { ticket })
    }

    /// Releases a writer acquisition with the fence of the writing work.
    pub fn release_writer(&mut self, done: Fence) {
        self.buffers.release_async(done);
    }

    /// Acquires SharedRead on the current snapshot.
    pub fn acquire_reader(&mut self) -> (Fence, StreamReader<T>) {
        let (fence, ticket) = self.buffers.acquire_async(AccessMode::SharedRead);
        (fence, StreamReader { ticket })
    }

    /// Releases a reader acquisition with the fence of the reading work.
    pub fn release_reader(&mut self, done: Fence) {
        self.buffers.release_async(done);
    }

    /// State of the most recent consolidation.
    #[must_use]
    pub fn consolidation_state(&self) -> ConsolidationState {
        if self.last_consolidation.is_complete() {
            ConsolidationState::Idle
        } else {
            ConsolidationState::Consolidating
        }
    }

    /// Fence of the most recent consolidation job.
    #[inline]
    #[must_use]
    pub fn last_consolidation(&self) -> &Fence {
        &self.last_consolidation
    }

    /// Totals across every finished consolidation.
    #[must_use]
    pub fn stats(&self) -> ConsolidationStats {
        self.stats.snapshot()
    }

    /// Appends one item from the calling thread, waiting for any
    /// conflicting access first.
    pub fn append_now(&mut self, lane: usize, item: T) {
        self.buffers
            .acquire(AccessMode::SharedWrite)
            .inbox
            .writer(lane)
            .write(item);
        self.buffers.release();
    }

    /// Reads the snapshot from the calling thread, waiting for any
    /// conflicting access first.
    pub fn with_snapshot<R>(&mut self, read: impl FnOnce(&Snapshot<T>) -> R) -> R {
        let result = read(&self.buffers.acquire(AccessMode::SharedRead).snapshot);
        self.buffers.release();
        result
    }

    /// Items waiting in the inbox, after any in-flight writers finished.
    pub fn pending_len(&mut self) -> usize {
        let len = self.buffers.acquire(AccessMode::SharedRead).inbox.len();
        self.buffers.release();
        len
    }

    /// Waits for all prior access and frees both buffers. The stream stays
    /// disposed until [`reset`](Self::reset).
    pub fn dispose(&mut self) {
        self.buffers.dispose();
        tracing::debug!(stream = %self.name, "stream disposed");
    }

    /// Whether the stream has been disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.buffers.controller().is_disposing()
    }

    /// Re-arms a disposed stream with empty buffers.
    pub fn reset(&mut self) {
        self.buffers
            .reset(StreamBuffers::new(self.lane_count), &Fence::completed());
        self.last_consolidation = Fence::completed();
    }
}

impl<T: Send + Sync + 'static> DataStream<T> {
    /// Schedules one consolidation pass: clear the snapshot, drain every lane
    /// into it, empty the inbox. Returns the job's fence.
    pub fn consolidate(&mut self, pool: &JobPool) -> Fence {
        self.consolidate_with(pool, &Fence::completed(), |buffers| {
            buffers.consolidate_routed(|_| Route::Keep, drop)
        })
    }

    /// Schedules a consolidation pass under ExclusiveWrite that also waits on
    /// `after`, running `pass` over the buffers.
    pub(crate) fn consolidate_with(
        &mut self,
        pool: &JobPool,
        after: &Fence,
        pass: impl FnOnce(&mut StreamBuffers<T>) -> ConsolidationOutcome + Send + 'static,
    ) -> Fence {
        let (acquired, ticket) = self.buffers.acquire_async(AccessMode::ExclusiveWrite);
        let start = Fence::combine(&acquired, after);
        let stats = Arc::clone(&self.stats);
        let name = self.name.clone();

        let done = pool.schedule(&start, move || {
            let outcome = pass(&mut ticket.write());
            stats.record(outcome);
            tracing::debug!(
                stream = %name,
                kept = outcome.kept,
                dropped = outcome.dropped,
                redirected = outcome.redirected,
                "stream consolidated"
            );
        });

        self.buffers.release_async(done.clone());
        self.last_consolidation = done.clone();
        done
    }
}

impl<T> std::fmt::Debug for DataStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("name", &self.name)
            .field("lanes", &self.lane_count)
            .field("state", &self.consolidation_state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Producer handle for a stream's inbox. Clone it into per-lane jobs.
pub struct StreamWriter<T> {
    ticket: AccessTicket<StreamBuffers<T>>,
}

impl<T> Clone for StreamWriter<T> {
    fn clone(&self) -> Self {
        Self {
            ticket: self.ticket.clone(),
        }
    }
}

impl<T> StreamWriter<T> {
    /// Appends one item to `lane`.
    pub fn write(&self, lane: usize, item: T) {
        self.ticket.read().inbox.writer(lane).write(item);
    }

    /// Binds the writer to one lane for a run of appends.
    #[must_use]
    pub fn lane(&self, lane: usize) -> LaneWriter<'_, T> {
        let buffers = self.ticket.read();
        // Validate once up front.
        let _ = buffers.inbox.writer(lane);
        LaneWriter { buffers, lane }
    }
}

/// A [`StreamWriter`] bound to one lane.
pub struct LaneWriter<'a, T> {
    buffers: RwLockReadGuard<'a, StreamBuffers<T>>,
    lane: usize,
}

impl<T> LaneWriter<'_, T> {
    /// Lane this writer appends to.
    #[inline]
    #[must_use]
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Appends one item.
    #[inline]
    pub fn write(&self, item: T) {
        self.buffers.inbox.writer(self.lane).write(item);
    }
}

/// Consumer handle for a stream's snapshot.
pub struct StreamReader<T> {
    ticket: AccessTicket<StreamBuffers<T>>,
}

impl<T> Clone for StreamReader<T> {
    fn clone(&self) -> Self {
        Self {
            ticket: self.ticket.clone(),
        }
    }
}

impl<T> StreamReader<T> {
    /// The snapshot. Hold the guard for the duration of the read.
    #[must_use]
    pub fn snapshot(&self) -> MappedRwLockReadGuard<'_, Snapshot<T>> {
        RwLockReadGuard::map(self.ticket.read(), |buffers| &buffers.snapshot)
    }

    /// Snapshot length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticket.read().snapshot.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> StreamReader<T> {
    /// Copy of the item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.ticket.read().snapshot.get(index).cloned()
    }
}
