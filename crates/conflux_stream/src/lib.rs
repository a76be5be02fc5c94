//! # CONFLUX Stream
//!
//! Producer/consumer buffers and cooperative cancellation on top of
//! `conflux_core` access control:
//! - Multi-lane inboxes consolidated into flat snapshots once per cycle
//! - Cancellation-aware consolidation (drop, redirect or ignore)
//! - The Request -> Progress -> Complete cancellation pipeline
//! - An owner arena that fans cancellation out to ancestors
//! - An explicit registry that owns it all
//!
//! ## Cycle
//!
//! ```text
//!   harden requests ─> producer/consumer jobs ─> consolidate streams ─> advance cancellations
//!        (owners)          (SharedWrite/Read)        (ExclusiveWrite)        (progress, complete)
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod cancel;
pub mod cancellable;
pub mod inbox;
pub mod lookup;
pub mod owner;
pub mod registry;
pub mod snapshot;
pub mod stream;

pub use cancel::{
    CancelCompleteDataStream, CancelProgressDataStream, CancelReader, CancelRequestDataStream,
    CancelWriter, CancellationPipeline, CompleteReader, LaneCancelWriter, ProgressClaimer,
};
pub use cancellable::CancellableDataStream;
pub use inbox::{Inbox, InboxWriter};
pub use lookup::Lookup;
pub use owner::{OwnerIndex, OwnerNode, OwnerTree};
pub use registry::{RegistryKey, StreamRegistry};
pub use snapshot::Snapshot;
pub use stream::{
    ConsolidationState, ConsolidationStats, DataStream, LaneWriter, StreamReader, StreamWriter,
};
