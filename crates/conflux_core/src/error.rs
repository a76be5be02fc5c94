//! # Conflux Error Types
//!
//! All errors that can occur in the access-control and stream layers.
//!
//! Two kinds live here. Recoverable ones (configuration, registry misuse,
//! checked ticket redemption) travel as `Result`. The fatal classes
//! (usage-ordering, dependency-chain, duplicate-key) are raised through
//! [`invariant!`](crate::invariant!) and never returned to a caller.

use thiserror::Error;

use crate::access::AccessMode;
use crate::identity::InstanceId;

/// Errors that can occur in the conflux pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfluxError {
    /// `acquire` was called while a previous acquisition was still outstanding.
    #[error("acquire without release: a {held:?} acquisition is still outstanding")]
    AcquireWithoutRelease {
        /// Mode of the outstanding acquisition.
        held: AccessMode,
    },

    /// `acquire` was called on a controller that is being disposed.
    #[error("acquire after disposal: controller is disposing until reset")]
    AcquireAfterDisposal,

    /// `release` was called with no acquisition outstanding.
    #[error("double release: no acquisition is outstanding")]
    DoubleRelease,

    /// `release` was called after a disposal acquisition.
    #[error("release while disposing: disposal needs no release")]
    ReleaseWhileDisposing,

    /// The fence passed to `release` does not depend on the fence handed out
    /// by the matching `acquire`.
    #[error("broken dependency chain: {mode:?} release fence does not depend on its acquire fence")]
    BrokenDependencyChain {
        /// Mode of the acquisition being released.
        mode: AccessMode,
    },

    /// A ticket was redeemed while incompatible access was still live.
    #[error("access contended: {mode:?} ticket redeemed while incompatible access is live")]
    AccessContended {
        /// Mode the ticket was issued for.
        mode: AccessMode,
    },

    /// Mutable access was requested through a shared acquisition.
    #[error("mutable access through a {mode:?} acquisition")]
    ModeMismatch {
        /// Mode the access was issued for.
        mode: AccessMode,
    },

    /// The same instance was inserted twice into a single-cycle lookup.
    #[error("duplicate key: {id} already present in lookup")]
    DuplicateKey {
        /// The offending instance.
        id: InstanceId,
    },

    /// A writer addressed a lane that does not exist.
    #[error("invalid lane: {lane} (inbox has {lane_count} lanes)")]
    InvalidLane {
        /// Lane requested.
        lane: usize,
        /// Lanes available.
        lane_count: usize,
    },

    /// An owner index does not refer to a node in the owner tree.
    #[error("unknown owner index: {0}")]
    UnknownOwner(u32),

    /// A name was registered twice in the same registry.
    #[error("duplicate registration: {name}")]
    DuplicateRegistration {
        /// The duplicated name.
        name: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration {path}: {reason}")]
    ConfigIo {
        /// Path that was read.
        path: String,
        /// Underlying IO failure.
        reason: String,
    },

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {reason}")]
    WorkerSpawn {
        /// Underlying IO failure.
        reason: String,
    },
}

/// Result type for conflux operations.
pub type ConfluxResult<T> = Result<T, ConfluxError>;
