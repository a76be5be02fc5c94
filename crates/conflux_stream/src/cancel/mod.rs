//! # Cancellation Pipeline
//!
//! Cooperative cancellation of in-flight items, in three chained stages:
//!
//! ```text
//!   request_cancel(id)          harden               update               consolidate
//!   ─────────────────> [Request inbox] ──> lookup ──> [Progress] ──false──> [Complete]
//!                                          │           ▲    │
//!                                          │   claim() │    └─ true -> false
//!                                          └──> ancestors' propagation lanes
//! ```
//!
//! Per item: `Requested -> InProgress -> Completed`. A job that still has
//! cancellation work for an item claims it, which keeps it in progress for
//! one more cycle. An item nobody claims for a full cycle lands in the
//! Complete snapshot and leaves both the progress and request lookups.

mod complete;
mod pipeline;
mod progress;
mod request;

pub use complete::{CancelCompleteDataStream, CompleteReader};
pub use pipeline::CancellationPipeline;
pub use progress::{CancelProgressDataStream, ProgressClaimer};
pub use request::{CancelReader, CancelRequestDataStream, CancelWriter, LaneCancelWriter};
