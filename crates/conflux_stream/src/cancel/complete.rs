//! Complete stage: a narrow snapshot of ids whose cancellation resolved.

use conflux_core::{Fence, InstanceId, JobPool};

use crate::snapshot::Snapshot;
use crate::stream::{ConsolidationStats, DataStream, StreamReader, StreamWriter};

/// Last stage of the cancellation pipeline. Owners read it to free anything
/// keyed on a finished id.
#[derive(Debug)]
pub struct CancelCompleteDataStream {
    stream: DataStream<InstanceId>,
}

impl CancelCompleteDataStream {
    /// Creates an empty complete stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stream: DataStream::new(name, 1),
        }
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.stream.name()
    }

    /// Acquires SharedRead on the completed ids.
    pub fn acquire_reader(&mut self) -> (Fence, CompleteReader) {
        let (fence, reader) = self.stream.acquire_reader();
        (fence, CompleteReader { reader })
    }

    /// Releases a reader acquisition.
    pub fn release_reader(&mut self, done: Fence) {
        self.stream.release_reader(done);
    }

    pub(crate) fn acquire_writer(&mut self) -> (Fence, StreamWriter<InstanceId>) {
        self.stream.acquire_writer()
    }

    pub(crate) fn release_writer(&mut self, done: Fence) {
        self.stream.release_writer(done);
    }

    /// Publishes the ids completed since the last consolidation.
    pub fn consolidate(&mut self, pool: &JobPool) -> Fence {
        self.stream.consolidate(pool)
    }

    /// Reads the completed ids from the calling thread.
    pub fn with_completed<R>(&mut self, read: impl FnOnce(&Snapshot<InstanceId>) -> R) -> R {
        self.stream.with_snapshot(read)
    }

    /// Whether `id` completed this cycle, from the calling thread.
    pub fn contains_now(&mut self, id: InstanceId) -> bool {
        self.with_completed(|ids| ids.iter().any(|done| *done == id))
    }

    /// Consolidation totals.
    #[must_use]
    pub fn stats(&self) -> ConsolidationStats {
        self.stream.stats()
    }

    /// Waits for all prior access and frees the buffers.
    pub fn dispose(&mut self) {
        self.stream.dispose();
    }

    /// Re-arms a disposed stage.
    pub fn reset(&mut self) {
        self.stream.reset();
    }
}

/// Read handle for the ids completed this cycle.
#[derive(Clone)]
pub struct CompleteReader {
    reader: StreamReader<InstanceId>,
}

impl CompleteReader {
    /// Whether `id` completed this cycle.
    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.reader.snapshot().iter().any(|done| *done == id)
    }

    /// Number of ids completed this cycle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reader.len()
    }

    /// Whether nothing completed this cycle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }

    /// Copy of the ids completed this cycle.
    #[must_use]
    pub fn ids(&self) -> Vec<InstanceId> {
        self.reader.snapshot().as_slice().to_vec()
    }
}
