//! # Cancellable Data Stream
//!
//! A [`DataStream`] whose consolidation consults the owner's cancellation
//! requests, once per item:
//!
//! | behaviour | item's id has a request |
//! |---|---|
//! | `None` | lookup never consulted, item copied |
//! | `Default` | item dropped |
//! | `Explicit` | item moved to the pending-cancel stream |
//!
//! Consolidation takes ExclusiveWrite on the stream, SharedRead on the
//! request lookup and SharedWrite on the pending-cancel stream.

use conflux_core::{CancelBehaviour, Fence, Identified, JobPool};

use crate::cancel::CancelRequestDataStream;
use crate::snapshot::Snapshot;
use crate::stream::{
    ConsolidationState, ConsolidationStats, DataStream, Route, StreamReader, StreamWriter,
};

/// Data stream filtered by pending cancellation requests.
#[derive(Debug)]
pub struct CancellableDataStream<T> {
    stream: DataStream<T>,
    behaviour: CancelBehaviour,
    pending_cancel: Option<DataStream<T>>,
}

impl<T> CancellableDataStream<T> {
    /// Creates a stream. `Explicit` also creates a one-lane pending-cancel
    /// stream named `<name>.pending_cancel`.
    #[must_use]
    pub fn new(name: impl Into<String>, lane_count: usize, behaviour: CancelBehaviour) -> Self {
        let name = name.into();
        let pending_cancel = (behaviour == CancelBehaviour::Explicit)
            .then(|| DataStream::new(format!("{name}.pending_cancel"), 1));
        Self {
            stream: DataStream::new(name, lane_count),
            behaviour,
            pending_cancel,
        }
    }

    /// Consolidation behaviour.
    #[inline]
    #[must_use]
    pub fn behaviour(&self) -> CancelBehaviour {
        self.behaviour
    }

    /// Stream name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.stream.name()
    }

    /// The underlying stream.
    #[inline]
    #[must_use]
    pub fn stream(&self) -> &DataStream<T> {
        &self.stream
    }

    /// The underlying stream, mutably.
    #[inline]
    pub fn stream_mut(&mut self) -> &mut DataStream<T> {
        &mut self.stream
    }

    /// Stream of items redirected for explicit resolution. `Explicit` only.
    #[inline]
    pub fn pending_cancel_mut(&mut self) -> Option<&mut DataStream<T>> {
        self.pending_cancel.as_mut()
    }

    /// See [`DataStream::acquire_writer`].
    pub fn acquire_writer(&mut self) -> (Fence, StreamWriter<T>) {
        self.stream.acquire_writer()
    }

    /// See [`DataStream::release_writer`].
    pub fn release_writer(&mut self, done: Fence) {
        self.stream.release_writer(done);
    }

    /// See [`DataStream::acquire_reader`].
    pub fn acquire_reader(&mut self) -> (Fence, StreamReader<T>) {
        self.stream.acquire_reader()
    }

    /// See [`DataStream::release_reader`].
    pub fn release_reader(&mut self, done: Fence) {
        self.stream.release_reader(done);
    }

    /// See [`DataStream::append_now`].
    pub fn append_now(&mut self, lane: usize, item: T) {
        self.stream.append_now(lane, item);
    }

    /// See [`DataStream::with_snapshot`].
    pub fn with_snapshot<R>(&mut self, read: impl FnOnce(&Snapshot<T>) -> R) -> R {
        self.stream.with_snapshot(read)
    }

    /// See [`DataStream::consolidation_state`].
    #[must_use]
    pub fn consolidation_state(&self) -> ConsolidationState {
        self.stream.consolidation_state()
    }

    /// See [`DataStream::stats`].
    #[must_use]
    pub fn stats(&self) -> ConsolidationStats {
        self.stream.stats()
    }

    /// Disposes the stream and its pending-cancel stream.
    pub fn dispose(&mut self) {
        if let Some(pending) = self.pending_cancel.as_mut() {
            pending.dispose();
        }
        self.stream.dispose();
    }

    /// Re-arms the stream and its pending-cancel stream after
    /// [`dispose`](Self::dispose).
    pub fn reset(&mut self) {
        self.stream.reset();
        if let Some(pending) = self.pending_cancel.as_mut() {
            pending.reset();
        }
    }
}

impl<T: Identified + Send + Sync + 'static> CancellableDataStream<T> {
    /// Schedules one consolidation pass filtered by `requests`. With
    /// `Explicit`, the pending-cancel stream is consolidated right after.
    pub fn consolidate(&mut self, pool: &JobPool, requests: &mut CancelRequestDataStream) -> Fence {
        match (self.behaviour, self.pending_cancel.as_mut()) {
            (CancelBehaviour::Explicit, Some(pending)) => {
                let (cancel_fence, cancel) = requests.acquire_reader();
                let (pending_fence, redirect) = pending.acquire_writer();
                let after = Fence::combine(&cancel_fence, &pending_fence);

                let done = self.stream.consolidate_with(pool, &after, move |buffers| {
                    let lookup = cancel.lookup();
                    let out = redirect.lane(0);
                    buffers.consolidate_routed(
                        |item| {
                            if lookup.contains(&item.instance_id()) {
                                Route::Redirect
                            } else {
                                Route::Keep
                            }
                        },
                        |item| out.write(item),
                    )
                });

                requests.release_reader(done.clone());
                pending.release_writer(done.clone());
                let published = pending.consolidate(pool);
                Fence::combine(&done, &published)
            }
            (CancelBehaviour::Default, _) => {
                let (cancel_fence, cancel) = requests.acquire_reader();
                let done = self.stream.consolidate_with(pool, &cancel_fence, move |buffers| {
                    let lookup = cancel.lookup();
                    buffers.consolidate_routed(
                        |item| {
                            if lookup.contains(&item.instance_id()) {
                                Route::Drop
                            } else {
                                Route::Keep
                            }
                        },
                        drop,
                    )
                });
                requests.release_reader(done.clone());
                done
            }
            _ => self.stream.consolidate(pool),
        }
    }
}
