//! # CONFLUX
//!
//! Lock-free producer/consumer streams with cooperative, hierarchical
//! cancellation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            CONFLUX                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐    ┌──────────────────────────────────┐    │
//! │  │  conflux_core    │    │  conflux_stream                  │    │
//! │  │  • Fence         │───>│  • Inbox / Snapshot / DataStream │    │
//! │  │  • JobPool       │    │  • Cancellation pipeline         │    │
//! │  │  • Access control│    │  • Owner tree                    │    │
//! │  │  • InstanceId    │    │  • StreamRegistry                │    │
//! │  └──────────────────┘    └────────────────┬─────────────────┘    │
//! │                                           │                      │
//! │                          ┌────────────────▼─────────────────┐    │
//! │                          │  FrameLoop (this crate)          │    │
//! │                          └──────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `frame_loop`: one-call cycle driver and frame statistics

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod frame_loop;

pub use conflux_core as core;
pub use conflux_stream as stream;

pub use conflux_core::{
    invariant, AccessControlledValue, AccessMode, CancelBehaviour, ConfluxError, ConfluxResult,
    EntityKey, Fence, Identified, InstanceId, JobPool, OwnerId, PipelineConfig, Tagged, TargetId,
};
pub use conflux_stream::{
    CancellableDataStream, CancellationPipeline, DataStream, OwnerIndex, OwnerTree, RegistryKey,
    Snapshot, StreamRegistry,
};
pub use frame_loop::{FrameContext, FrameLoop, FrameStats, FrameStatsAccumulator};
