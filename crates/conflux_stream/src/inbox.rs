//! # Inbox
//!
//! A set of independent append-only lanes, one per producer:
//!
//! ```text
//!   worker 0 ──> lane 0: [A, B]
//!   worker 1 ──> lane 1: [C]        ──drain──> A, B, C
//!   worker 2 ──> lane 2: []
//! ```
//!
//! Lanes are lock-free queues. There is no random access: producers only
//! append, and the consolidator drains everything, lane by lane. Order is
//! kept within a lane, never across lanes.

use crossbeam_channel::{unbounded, Receiver, Sender};

use conflux_core::{invariant, ConfluxError};

struct Lane<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

/// Multi-lane append-only buffer.
pub struct Inbox<T> {
    lanes: Vec<Lane<T>>,
}

impl<T> Inbox<T> {
    /// Creates an inbox with `lane_count` empty lanes.
    ///
    /// # Panics
    ///
    /// Panics if `lane_count` is zero.
    #[must_use]
    pub fn new(lane_count: usize) -> Self {
        assert!(lane_count > 0, "Inbox needs at least one lane");
        let lanes = (0..lane_count)
            .map(|_| {
                let (sender, receiver) = unbounded();
                Lane { sender, receiver }
            })
            .collect();
        Self { lanes }
    }

    /// Number of lanes.
    #[inline]
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Writer bound to one lane. Only one producer may own a lane at a time.
    ///
    /// # Panics
    ///
    /// Panics if `lane` is out of range.
    #[must_use]
    pub fn writer(&self, lane: usize) -> InboxWriter<'_, T> {
        invariant!(
            lane < self.lanes.len(),
            ConfluxError::InvalidLane {
                lane,
                lane_count: self.lanes.len(),
            }
        );
        InboxWriter {
            lane,
            sender: &self.lanes[lane].sender,
        }
    }

    /// Total number of items across all lanes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.iter().map(|lane| lane.receiver.len()).sum()
    }

    /// Whether every lane is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(|lane| lane.receiver.is_empty())
    }

    /// Drains every lane in lane order, handing each item to `sink` with its
    /// lane index. Returns the number of items drained.
    pub fn drain_lanes(&mut self, mut sink: impl FnMut(usize, T)) -> usize {
        let mut drained = 0;
        for (index, lane) in self.lanes.iter().enumerate() {
            for item in lane.receiver.try_iter() {
                sink(index, item);
                drained += 1;
            }
        }
        drained
    }

    /// Drains every lane into `out`, lane by lane.
    pub fn drain_into(&mut self, out: &mut Vec<T>) -> usize {
        out.reserve(self.len());
        self.drain_lanes(|_, item| out.push(item))
    }

    /// Discards everything.
    pub fn clear(&mut self) {
        self.drain_lanes(|_, item| drop(item));
    }
}

impl<T> std::fmt::Debug for Inbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("lanes", &self.lanes.len())
            .field("len", &self.len())
            .finish()
    }
}

/// Append handle for one lane of an [`Inbox`].
pub struct InboxWriter<'a, T> {
    lane: usize,
    sender: &'a Sender<T>,
}

impl<T> InboxWriter<'_, T> {
    /// Lane this writer appends to.
    #[inline]
    #[must_use]
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Appends one item.
    #[inline]
    pub fn write(&self, item: T) {
        // The receiver lives as long as the inbox this writer borrows.
        let _ = self.sender.send(item);
    }
}
