//! The three cancellation stages bundled for one owner.

use conflux_core::{Fence, JobPool};

use super::complete::CancelCompleteDataStream;
use super::progress::CancelProgressDataStream;
use super::request::CancelRequestDataStream;

/// Request, progress and complete stages of one owner.
///
/// One cycle is [`harden_requests`](Self::harden_requests), then the
/// owner's jobs, then [`advance`](Self::advance).
#[derive(Debug)]
pub struct CancellationPipeline {
    requests: CancelRequestDataStream,
    progress: CancelProgressDataStream,
    complete: CancelCompleteDataStream,
}

impl CancellationPipeline {
    /// Creates the three stages, named after `name`.
    #[must_use]
    pub fn new(name: &str, lane_count: usize) -> Self {
        Self {
            requests: CancelRequestDataStream::new(format!("{name}.cancel_request"), lane_count),
            progress: CancelProgressDataStream::new(format!("{name}.cancel_progress")),
            complete: CancelCompleteDataStream::new(format!("{name}.cancel_complete")),
        }
    }

    /// Request stage.
    #[inline]
    #[must_use]
    pub fn requests(&self) -> &CancelRequestDataStream {
        &self.requests
    }

    /// Request stage, mutably (for acquiring writers and readers).
    #[inline]
    pub fn requests_mut(&mut self) -> &mut CancelRequestDataStream {
        &mut self.requests
    }

    /// Progress stage.
    #[inline]
    #[must_use]
    pub fn progress(&self) -> &CancelProgressDataStream {
        &self.progress
    }

    /// Progress stage, mutably (for acquiring claimers).
    #[inline]
    pub fn progress_mut(&mut self) -> &mut CancelProgressDataStream {
        &mut self.progress
    }

    /// Complete stage.
    #[inline]
    #[must_use]
    pub fn complete(&self) -> &CancelCompleteDataStream {
        &self.complete
    }

    /// Complete stage, mutably (for acquiring readers).
    #[inline]
    pub fn complete_mut(&mut self) -> &mut CancelCompleteDataStream {
        &mut self.complete
    }

    /// Hardens this cycle's requests, forwarding local ones to `ancestors`.
    pub fn harden_requests(
        &mut self,
        pool: &JobPool,
        ancestors: &mut [&mut CancelRequestDataStream],
    ) -> Fence {
        self.requests.harden(pool, &mut self.progress, ancestors)
    }

    /// Ages progress and publishes the ids that completed.
    pub fn advance(&mut self, pool: &JobPool) -> Fence {
        self.progress
            .update(pool, &mut self.requests, &mut self.complete);
        self.complete.consolidate(pool)
    }

    /// Ids completed over the lifetime of this pipeline.
    #[must_use]
    pub fn completed_total(&self) -> u64 {
        self.progress.completed_total()
    }

    /// Disposes all three stages, last stage first.
    pub fn dispose(&mut self) {
        self.complete.dispose();
        self.progress.dispose();
        self.requests.dispose();
    }

    /// Re-arms all three stages after disposal.
    pub fn reset(&mut self) {
        self.requests.reset();
        self.progress.reset();
        self.complete.reset();
    }
}
