//! # Frame Loop
//!
//! Drives one logical cycle per call:
//! ```text
//! Frame N:
//! ┌───────────────────────────────────────────────────────────────┐
//! │ 1. HARDEN        owners' cancel requests, children first      │
//! │ 2. WORK          caller's producers/consumers (FrameContext)  │
//! │ 3. CONSOLIDATE   every registered stream, inbox -> snapshot   │
//! │ 4. ADVANCE       progress aging, CancelComplete published     │
//! │ 5. WAIT          on the combined frame fence                  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing between steps blocks: each step only registers acquisitions
//! and schedules jobs, and the controllers order them. The only wait is
//! step 5.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conflux_core::{ConfluxResult, Fence, JobPool, PipelineConfig};
use conflux_stream::StreamRegistry;

/// Statistics for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Wall time from harden to the end of the wait.
    pub elapsed: Duration,
    /// Items copied into snapshots this frame.
    pub items_consolidated: u64,
    /// Cancellations that reached CancelComplete this frame.
    pub cancellations_completed: u64,
}

/// Accumulator for frame statistics.
#[derive(Clone, Debug)]
pub struct FrameStatsAccumulator {
    /// Total frames recorded.
    pub frames_recorded: u64,
    /// Sum of frame times.
    pub total_elapsed: Duration,
    /// Fastest frame.
    pub min_frame: Duration,
    /// Slowest frame.
    pub max_frame: Duration,
    /// Frames that exceeded the budget.
    pub frames_over_budget: u64,
    /// Items consolidated across all frames.
    pub items_consolidated: u64,
    /// Cancellations completed across all frames.
    pub cancellations_completed: u64,
}

impl Default for FrameStatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStatsAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames_recorded: 0,
            total_elapsed: Duration::ZERO,
            min_frame: Duration::MAX,
            max_frame: Duration::ZERO,
            frames_over_budget: 0,
            items_consolidated: 0,
            cancellations_completed: 0,
        }
    }

    /// Records one frame.
    pub fn record(&mut self, stats: FrameStats, budget: Duration) {
        self.frames_recorded += 1;
        self.total_elapsed += stats.elapsed;
        self.min_frame = self.min_frame.min(stats.elapsed);
        self.max_frame = self.max_frame.max(stats.elapsed);
        self.items_consolidated += stats.items_consolidated;
        self.cancellations_completed += stats.cancellations_completed;
        if stats.elapsed > budget {
            self.frames_over_budget += 1;
        }
    }

    /// Average frame time in milliseconds.
    #[must_use]
    pub fn avg_frame_ms(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        self.total_elapsed.as_secs_f64() * 1000.0 / self.frames_recorded as f64
    }
}

/// Handles for one frame's work.
pub struct FrameContext<'a> {
    registry: &'a mut StreamRegistry,
    frame: u64,
    work: Vec<Fence>,
}

impl FrameContext<'_> {
    /// Current frame number.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The registry, for acquiring streams, values and owners.
    #[inline]
    pub fn registry(&mut self) -> &mut StreamRegistry {
        self.registry
    }

    /// The worker pool.
    #[must_use]
    pub fn pool(&self) -> Arc<JobPool> {
        Arc::clone(self.registry.pool())
    }

    /// Adds `fence` to what the frame waits on before it ends.
    ///
    /// Work released into a stream is already covered by that stream's
    /// consolidation; this is for side work nothing else waits on.
    pub fn wait_on(&mut self, fence: Fence) {
        self.work.push(fence);
    }
}

/// Runs the registry one cycle per call.
pub struct FrameLoop {
    registry: StreamRegistry,
    frame: u64,
    budget: Duration,
    stats: FrameStatsAccumulator,
}

impl FrameLoop {
    /// Wraps an already-populated registry.
    #[must_use]
    pub fn new(registry: StreamRegistry) -> Self {
        let budget = registry.config().frame_budget();
        Self {
            registry,
            frame: 0,
            budget,
            stats: FrameStatsAccumulator::new(),
        }
    }

    /// Creates a registry from `config` and wraps it.
    pub fn from_config(config: PipelineConfig) -> ConfluxResult<Self> {
        Ok(Self::new(StreamRegistry::new(config)?))
    }

    /// The registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// The registry, mutably (for registration between frames).
    #[inline]
    pub fn registry_mut(&mut self) -> &mut StreamRegistry {
        &mut self.registry
    }

    /// Frames run so far.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Frame budget above which a frame is logged as slow.
    #[inline]
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> &FrameStatsAccumulator {
        &self.stats
    }

    /// Runs one frame, calling `work` between hardening and consolidation.
    pub fn run_frame(&mut self, work: impl FnOnce(&mut FrameContext<'_>)) -> FrameStats {
        let start = Instant::now();
        self.frame += 1;
        let consolidated_before = self.registry.items_consolidated();
        let completed_before = self.registry.cancellations_completed();

        let hardened = self.registry.harden_cancellations();

        let mut ctx = FrameContext {
            registry: &mut self.registry,
            frame: self.frame,
            work: Vec::new(),
        };
        work(&mut ctx);
        let side_work = ctx.work;

        let consolidated = self.registry.consolidate_all();
        let advanced = self.registry.advance_cancellations();

        let frame_fence = Fence::combine_all(
            side_work
                .iter()
                .chain([&hardened, &consolidated, &advanced]),
        );
        frame_fence.wait();

        let stats = FrameStats {
            frame: self.frame,
            elapsed: start.elapsed(),
            items_consolidated: self.registry.items_consolidated() - consolidated_before,
            cancellations_completed: self.registry.cancellations_completed() - completed_before,
        };
        self.stats.record(stats, self.budget);

        if stats.elapsed > self.budget {
            tracing::warn!(
                frame = stats.frame,
                elapsed_ms = stats.elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.budget.as_secs_f64() * 1000.0,
                "frame exceeded budget"
            );
        } else {
            tracing::trace!(
                frame = stats.frame,
                items = stats.items_consolidated,
                cancelled = stats.cancellations_completed,
                "frame complete"
            );
        }
        stats
    }

    /// Tears the registry down.
    pub fn shutdown(mut self) {
        self.registry.dispose_all();
        tracing::info!(
            frames = self.frame,
            avg_ms = self.stats.avg_frame_ms(),
            over_budget = self.stats.frames_over_budget,
            "frame loop stopped"
        );
    }
}

impl std::fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLoop")
            .field("frame", &self.frame)
            .field("budget", &self.budget)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
