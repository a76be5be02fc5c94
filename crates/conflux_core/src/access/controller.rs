//! # Access Controller
//!
//! Non-blocking gate in front of one piece of shared data. `acquire` hands
//! out the fence a caller must wait on before touching the data; `release`
//! records the fence of the work that touched it.
//!
//! ## Frontiers
//!
//! | released mode  | exclusive      | shared write   | shared read    |
//! |----------------|----------------|----------------|----------------|
//! | ExclusiveWrite | done           | done           | done           |
//! | SharedWrite    | excl + done    | (unchanged)    | excl + done    |
//! | SharedRead     | excl + done    | excl + done    | (unchanged)    |
//!
//! Shared writers never wait on each other and must partition their writes
//! themselves. Shared readers never wait on each other. Everything else is
//! ordered.

use crate::error::ConfluxError;
use crate::fence::Fence;
use crate::invariant;

/// Kind of access requested from an [`AccessController`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Sole access; ordered against everything.
    ExclusiveWrite,
    /// Concurrent partitioned writers; ordered against exclusive and readers.
    SharedWrite,
    /// Concurrent readers; ordered against every writer.
    SharedRead,
    /// Exclusive access that blocks further acquisition until `reset`.
    Disposal,
}

impl AccessMode {
    /// Whether the mode grants mutable access to the whole value.
    #[inline]
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::ExclusiveWrite | Self::Disposal)
    }
}

/// Acquisition state of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Nothing outstanding.
    Unacquired,
    /// An exclusive write acquisition is outstanding.
    ExclusiveWrite,
    /// A shared write acquisition is outstanding.
    SharedWrite,
    /// A shared read acquisition is outstanding.
    SharedRead,
    /// Disposed; no acquisition until `reset`.
    Disposing,
}

/// Fence-based access gate.
///
/// Exactly one acquisition may be outstanding at a time. Misuse is a fatal
/// invariant violation when checks are compiled in.
#[derive(Debug)]
pub struct AccessController {
    state: ControllerState,
    exclusive_frontier: Fence,
    shared_write_frontier: Fence,
    shared_read_frontier: Fence,
    /// Fence handed out by the outstanding acquisition.
    acquired: Fence,
}

impl Default for AccessController {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessController {
    /// Creates an unacquired controller with resolved frontiers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ControllerState::Unacquired,
            exclusive_frontier: Fence::completed(),
            shared_write_frontier: Fence::completed(),
            shared_read_frontier: Fence::completed(),
            acquired: Fence::completed(),
        }
    }

    /// Current acquisition state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Whether an acquisition is outstanding.
    #[inline]
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        !matches!(
            self.state,
            ControllerState::Unacquired | ControllerState::Disposing
        )
    }

    /// Whether the controller was disposed and awaits `reset`.
    #[inline]
    #[must_use]
    pub fn is_disposing(&self) -> bool {
        self.state == ControllerState::Disposing
    }

    /// Fence every future exclusive acquisition will wait on.
    #[inline]
    #[must_use]
    pub fn exclusive_frontier(&self) -> &Fence {
        &self.exclusive_frontier
    }

    /// Acquires access in `mode` and returns the fence to wait on before
    /// touching the data.
    ///
    /// # Panics
    ///
    /// With invariant checks compiled in: if the controller is disposing or
    /// an acquisition is still outstanding.
    pub fn acquire(&mut self, mode: AccessMode) -> Fence {
        invariant!(
            self.state != ControllerState::Disposing,
            ConfluxError::AcquireAfterDisposal
        );
        invariant!(
            self.state == ControllerState::Unacquired,
            ConfluxError::AcquireWithoutRelease {
                held: self.held_mode().unwrap_or(mode),
            }
        );

        let (fence, state) = match mode {
            AccessMode::ExclusiveWrite => (&self.exclusive_frontier, ControllerState::ExclusiveWrite),
            AccessMode::Disposal => (&self.exclusive_frontier, ControllerState::Disposing),
            AccessMode::SharedWrite => (&self.shared_write_frontier, ControllerState::SharedWrite),
            AccessMode::SharedRead => (&self.shared_read_frontier, ControllerState::SharedRead),
        };
        let fence = fence.clone();
        self.state = state;
        self.acquired = fence.clone();
        fence
    }

    /// Releases the outstanding acquisition. `done` must depend on the fence
    /// returned by the matching `acquire`.
    ///
    /// # Panics
    ///
    /// With invariant checks compiled in: on double release, release after
    /// disposal, or a `done` fence that breaks the dependency chain.
    pub fn release(&mut self, done: Fence) {
        let mode = match self.state {
            ControllerState::ExclusiveWrite => AccessMode::ExclusiveWrite,
            ControllerState::SharedWrite => AccessMode::SharedWrite,
            ControllerState::SharedRead => AccessMode::SharedRead,
            ControllerState::Disposing => {
                invariant!(false, ConfluxError::ReleaseWhileDisposing);
                return;
            }
            ControllerState::Unacquired => {
                invariant!(false, ConfluxError::DoubleRelease);
                return;
            }
        };
        invariant!(
            done.depends_on(&self.acquired),
            ConfluxError::BrokenDependencyChain { mode }
        );

        match mode {
            AccessMode::ExclusiveWrite | AccessMode::Disposal => {
                self.exclusive_frontier = done.clone();
                self.shared_write_frontier = done.clone();
                self.shared_read_frontier = done;
            }
            AccessMode::SharedWrite => {
                // Other shared writers keep gating on the old frontier only.
                let combined = Fence::combine(&self.exclusive_frontier, &done);
                self.exclusive_frontier = combined.clone();
                self.shared_read_frontier = combined;
            }
            AccessMode::SharedRead => {
                let combined = Fence::combine(&self.exclusive_frontier, &done);
                self.exclusive_frontier = combined.clone();
                self.shared_write_frontier = combined;
            }
        }
        self.state = ControllerState::Unacquired;
        self.acquired = Fence::completed();
    }

    /// Re-arms the controller for reuse.
    ///
    /// All frontiers become `initial`, still ordered after any work the
    /// controller already gated.
    pub fn reset(&mut self, initial: &Fence) {
        let frontier = Fence::combine(&self.exclusive_frontier, initial);
        self.exclusive_frontier = frontier.clone();
        self.shared_write_frontier = frontier.clone();
        self.shared_read_frontier = frontier;
        self.state = ControllerState::Unacquired;
        self.acquired = Fence::completed();
        tracing::trace!(fence = self.exclusive_frontier.id(), "access controller reset");
    }

    fn held_mode(&self) -> Option<AccessMode> {
        match self.state {
            ControllerState::ExclusiveWrite => Some(AccessMode::ExclusiveWrite),
            ControllerState::SharedWrite => Some(AccessMode::SharedWrite),
            ControllerState::SharedRead => Some(AccessMode::SharedRead),
            ControllerState::Disposing => Some(AccessMode::Disposal),
            ControllerState::Unacquired => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::FenceTrigger;

    /// Acquire, attach a pending job after the fence, release with it.
    fn run_pending(ctrl: &mut AccessController, mode: AccessMode) -> (Fence, FenceTrigger) {
        let acquired = ctrl.acquire(mode);
        let (done, trigger) = FenceTrigger::with_dependency(&acquired);
        ctrl.release(done.clone());
        (done, trigger)
    }

    #[test]
    fn test_controller_creation() {
        let ctrl = AccessController::new();
        assert_eq!(ctrl.state(), ControllerState::Unacquired);
        assert!(!ctrl.is_acquired());
        assert!(ctrl.exclusive_frontier().is_complete());
    }

    #[test]
    fn test_acquire_sets_state() {
        let mut ctrl = AccessController::new();
        let fence = ctrl.acquire(AccessMode::SharedRead);
        assert!(fence.is_complete());
        assert_eq!(ctrl.state(), ControllerState::SharedRead);
        ctrl.release(fence);
        assert_eq!(ctrl.state(), ControllerState::Unacquired);
    }

    #[test]
    fn test_exclusive_orders_everything() {
        let mut ctrl = AccessController::new();
        let (done, trigger) = run_pending(&mut ctrl, AccessMode::ExclusiveWrite);

        for mode in [
            AccessMode::ExclusiveWrite,
            AccessMode::SharedWrite,
            AccessMode::SharedRead,
        ] {
            let fence = ctrl.acquire(mode);
            assert!(fence.depends_on(&done), "{mode:?} must wait on exclusive");
            assert!(!fence.is_complete());
            ctrl.release(fence);
        }
        trigger.fire();
    }

    #[test]
    fn test_shared_writers_do_not_wait_on_each_other() {
        let mut ctrl = AccessController::new();
        let (first, _t1) = run_pending(&mut ctrl, AccessMode::SharedWrite);

        let second = ctrl.acquire(AccessMode::SharedWrite);
        assert!(second.is_complete());
        assert!(!second.depends_on(&first) || first.is_complete());
        ctrl.release(second);
    }

    #[test]
    fn test_shared_write_release_is_asymmetric() {
        let mut ctrl = AccessController::new();
        let shared_before = ctrl.shared_write_frontier.clone();
        let (done, _t) = run_pending(&mut ctrl, AccessMode::SharedWrite);

        assert_eq!(ctrl.shared_write_frontier, shared_before);
        assert!(ctrl.exclusive_frontier.depends_on(&done));
        assert!(ctrl.shared_read_frontier.depends_on(&done));
    }

    #[test]
    fn test_read_after_write_depends_on_write() {
        let mut ctrl = AccessController::new();
        let (write_done, trigger) = run_pending(&mut ctrl, AccessMode::SharedWrite);

        let read = ctrl.acquire(AccessMode::SharedRead);
        assert!(read.depends_on(&write_done));
        assert!(!read.is_complete());
        trigger.fire();
        assert!(read.is_complete());
        ctrl.release(read);
    }

    #[test]
    fn test_readers_do_not_wait_on_each_other_but_writers_do() {
        let mut ctrl = AccessController::new();
        let (read_done, trigger) = run_pending(&mut ctrl, AccessMode::SharedRead);

        let read = ctrl.acquire(AccessMode::SharedRead);
        assert!(read.is_complete());
        ctrl.release(read);

        let write = ctrl.acquire(AccessMode::SharedWrite);
        assert!(write.depends_on(&read_done));
        assert!(!write.is_complete());
        ctrl.release(write);
        trigger.fire();
    }

    #[test]
    fn test_disposal_then_reset() {
        let mut ctrl = AccessController::new();
        let (done, trigger) = run_pending(&mut ctrl, AccessMode::SharedWrite);

        let disposal = ctrl.acquire(AccessMode::Disposal);
        assert!(disposal.depends_on(&done));
        assert!(ctrl.is_disposing());
        trigger.fire();
        disposal.wait();

        ctrl.reset(&Fence::completed());
        assert_eq!(ctrl.state(), ControllerState::Unacquired);
        let fresh = ctrl.acquire(AccessMode::ExclusiveWrite);
        assert!(fresh.is_complete());
        ctrl.release(fresh);
    }

    #[test]
    #[should_panic(expected = "acquire without release")]
    fn test_acquire_without_release_panics() {
        let mut ctrl = AccessController::new();
        let _ = ctrl.acquire(AccessMode::SharedRead);
        let _ = ctrl.acquire(AccessMode::SharedRead);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn test_double_release_panics() {
        let mut ctrl = AccessController::new();
        let fence = ctrl.acquire(AccessMode::SharedRead);
        ctrl.release(fence.clone());
        ctrl.release(fence);
    }

    #[test]
    #[should_panic(expected = "acquire after disposal")]
    fn test_acquire_after_disposal_panics() {
        let mut ctrl = AccessController::new();
        let _ = ctrl.acquire(AccessMode::Disposal);
        let _ = ctrl.acquire(AccessMode::SharedRead);
    }

    #[test]
    #[should_panic(expected = "release while disposing")]
    fn test_release_after_disposal_panics() {
        let mut ctrl = AccessController::new();
        let fence = ctrl.acquire(AccessMode::Disposal);
        ctrl.release(fence);
    }

    #[test]
    #[should_panic(expected = "broken dependency chain")]
    fn test_unrelated_release_fence_panics() {
        let mut ctrl = AccessController::new();
        let (_gate, _gate_trigger) = run_pending(&mut ctrl, AccessMode::ExclusiveWrite);

        let _acquired = ctrl.acquire(AccessMode::ExclusiveWrite);
        let (unrelated, _t) = FenceTrigger::new();
        ctrl.release(unrelated);
    }
}
