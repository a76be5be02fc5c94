//! # Job Pool
//!
//! A fixed set of worker threads that run short units of work ordered by
//! fences.
//!
//! ```text
//!   schedule(after, job) ──> after.when_complete ──> [queue] ──> worker 0..N
//!                                                                   │
//!                                       returned fence <── fire ────┘
//! ```
//!
//! A job is only enqueued once its input fence resolved, so workers never
//! block on fences and a saturated pool cannot deadlock on its own queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{ConfluxError, ConfluxResult};
use crate::fence::{Fence, FenceTrigger};

/// How long an idle worker sleeps before re-checking for shutdown.
const IDLE_POLL: Duration = Duration::from_millis(5);

struct Job {
    work: Option<Box<dyn FnOnce() + Send>>,
    completed: Arc<AtomicU64>,
    trigger: FenceTrigger,
}

impl Job {
    fn run(mut self) {
        self.execute();
    }

    fn execute(&mut self) {
        let Some(work) = self.work.take() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(work)).is_err() {
            tracing::error!("job panicked; fence resolved");
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Job {
    /// A job stranded in a closed queue runs here; its trigger only fires
    /// after the work.
    fn drop(&mut self) {
        if self.work.is_some() {
            tracing::debug!("running job left in a closed queue");
            self.execute();
        }
    }
}

/// Pool of worker threads executing fence-ordered jobs.
pub struct JobPool {
    sender: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
}

impl JobPool {
    /// Spawns `worker_count` workers.
    ///
    /// # Panics
    ///
    /// Panics if [`try_new`](Self::try_new) fails.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self::try_new(worker_count).unwrap_or_else(|error| panic!("{error}"))
    }

    /// Spawns `worker_count` workers, reporting a zero count or a failed
    /// thread spawn as an error.
    pub fn try_new(worker_count: usize) -> ConfluxResult<Self> {
        if worker_count == 0 {
            return Err(ConfluxError::InvalidConfig(
                "job pool needs at least one worker".into(),
            ));
        }

        let (sender, receiver) = unbounded::<Job>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicU64::new(0));

        // On error the sender drops here, so already-spawned workers see a
        // disconnected queue and exit.
        let workers = (0..worker_count)
            .map(|index| {
                let receiver = receiver.clone();
                let shutdown = Arc::clone(&shutdown);
                thread::Builder::new()
                    .name(format!("conflux-worker-{index}"))
                    .spawn(move || Self::worker_loop(&receiver, &shutdown))
                    .map_err(|error| ConfluxError::WorkerSpawn {
                        reason: error.to_string(),
                    })
            })
            .collect::<ConfluxResult<Vec<_>>>()?;

        tracing::debug!(worker_count, "job pool started");

        Ok(Self {
            sender,
            workers,
            shutdown,
            completed,
        })
    }

    /// Worker thread main loop.
    fn worker_loop(receiver: &Receiver<Job>, shutdown: &AtomicBool) {
        loop {
            match receiver.recv_timeout(IDLE_POLL) {
                Ok(job) => job.run(),
                Err(RecvTimeoutError::Timeout) => {
                    if shutdown.load(Ordering::Acquire) && receiver.is_empty() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        for job in receiver.try_iter() {
            job.run();
        }
    }

    /// Number of worker threads.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs that have finished running.
    #[inline]
    #[must_use]
    pub fn completed_jobs(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Schedules `job` to run once `after` resolved.
    ///
    /// The returned fence depends on `after` and resolves when the job
    /// returned (or panicked).
    pub fn schedule(&self, after: &Fence, job: impl FnOnce() + Send + 'static) -> Fence {
        let (fence, trigger) = FenceTrigger::with_dependency(after);
        let sender = self.sender.clone();
        let job = Job {
            work: Some(Box::new(job)),
            completed: Arc::clone(&self.completed),
            trigger,
        };
        after.when_complete(move || {
            if let Err(rejected) = sender.send(job) {
                // Workers are gone; run on the resolving thread instead.
                tracing::warn!("job pool shut down; running job inline");
                rejected.into_inner().run();
            }
        });
        fence
    }

    /// Schedules `count` units of `job(index)` after `after` and returns
    /// their combined fence.
    pub fn schedule_batch(
        &self,
        after: &Fence,
        count: usize,
        job: impl Fn(usize) + Send + Sync + 'static,
    ) -> Fence {
        let job = Arc::new(job);
        let fences: Vec<Fence> = (0..count)
            .map(|index| {
                let job = Arc::clone(&job);
                self.schedule(after, move || job(index))
            })
            .collect();
        Fence::combine_all(&fences)
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("conflux worker exited abnormally");
            }
        }
        tracing::debug!(completed = self.completed_jobs(), "job pool stopped");
    }
}

impl std::fmt::Debug for JobPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPool")
            .field("workers", &self.workers.len())
            .field("completed", &self.completed_jobs())
            .finish()
    }
}
