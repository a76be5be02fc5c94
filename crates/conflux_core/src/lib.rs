//! # CONFLUX Core
//!
//! Lock-free access control for shared pipeline buffers:
//! - Completion fences that combine into a dependency graph
//! - A worker pool that runs jobs once their fences resolve
//! - Access controllers that hand out fences instead of locks
//! - Stable identities for logical task items
//!
//! ## Architecture Rules
//!
//! 1. **Nothing blocks on the data path** - callers schedule after fences
//! 2. **One acquisition outstanding per controller** - release before re-acquire
//! 3. **Misuse is fatal** - checked by `invariant!` in debug builds, free in release
//!
//! ## Example
//!
//! ```rust,ignore
//! use conflux_core::{AccessControlledValue, AccessMode, JobPool};
//!
//! let pool = JobPool::new(4);
//! let mut counts = AccessControlledValue::new(vec![0u32; 4]);
//!
//! let (fence, ticket) = counts.acquire_async(AccessMode::ExclusiveWrite);
//! let done = pool.schedule(&fence, move || ticket.write()[0] += 1);
//! counts.release_async(done);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod access;
pub mod config;
pub mod error;
pub mod fence;
pub mod identity;
pub mod invariant;
pub mod pool;

pub use access::{
    AccessControlledValue, AccessController, AccessGuard, AccessMode, AccessTicket,
    ControllerState, Dispose,
};
pub use config::{CancelBehaviour, PipelineConfig};
pub use error::{ConfluxError, ConfluxResult};
pub use fence::{Fence, FenceTrigger};
pub use identity::{EntityKey, Identified, InstanceId, OwnerId, TargetId, Tagged};
pub use pool::JobPool;
