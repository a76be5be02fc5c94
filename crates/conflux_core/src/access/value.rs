//! # Access-Controlled Value
//!
//! Binds one shared value to one [`AccessController`].
//!
//! The value lives behind an `Arc<RwLock<T>>`, but the lock is never waited
//! on. Fences already order every access, so redeeming a ticket uses
//! `try_read`/`try_write`; a failed attempt means the access discipline was
//! broken and is fatal when invariant checks are compiled in.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut value = AccessControlledValue::new(Vec::<u32>::new());
//!
//! // Main thread: block until the fence resolves.
//! value.acquire(AccessMode::ExclusiveWrite).push(7);
//! value.release();
//!
//! // Worker: schedule against the fence instead of stalling.
//! let (fence, ticket) = value.acquire_async(AccessMode::SharedRead);
//! let done = pool.schedule(&fence, move || println!("{}", ticket.read().len()));
//! value.release_async(done);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::controller::{AccessController, AccessMode};
use crate::error::{ConfluxError, ConfluxResult};
use crate::fence::Fence;
use crate::invariant;

/// Values that own resources to free when their controller is disposed.
///
/// The default does nothing, so plain data opts in with an empty impl.
pub trait Dispose {
    /// Frees owned resources. Called once under Disposal access.
    fn dispose(&mut self) {}
}

impl<T> Dispose for Vec<T> {
    fn dispose(&mut self) {
        self.clear();
        self.shrink_to_fit();
    }
}

// Scalar counters hold nothing to free.
impl Dispose for u32 {}
impl Dispose for u64 {}

/// Permission to touch a value once the matching fence resolved.
///
/// Tickets are cheap to clone so a batch of jobs can share one acquisition.
pub struct AccessTicket<T> {
    value: Arc<RwLock<T>>,
    mode: AccessMode,
}

impl<T> Clone for AccessTicket<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            mode: self.mode,
        }
    }
}

impl<T> AccessTicket<T> {
    /// Mode this ticket was issued for.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Shared access, or an error if incompatible access is still live.
    pub fn try_read(&self) -> ConfluxResult<RwLockReadGuard<'_, T>> {
        self.value
            .try_read()
            .ok_or(ConfluxError::AccessContended { mode: self.mode })
    }

    /// Mutable access, or an error if the ticket is shared or any other
    /// access is still live.
    pub fn try_write(&self) -> ConfluxResult<RwLockWriteGuard<'_, T>> {
        if !self.mode.is_exclusive() {
            return Err(ConfluxError::ModeMismatch { mode: self.mode });
        }
        self.value
            .try_write()
            .ok_or(ConfluxError::AccessContended { mode: self.mode })
    }

    /// Shared access to the value. Valid for every mode.
    ///
    /// # Panics
    ///
    /// With invariant checks compiled in: if incompatible access is live.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        match self.try_read() {
            Ok(guard) => guard,
            Err(error) => {
                invariant!(false, error);
                self.value.read()
            }
        }
    }

    /// Mutable access to the value. Exclusive and disposal tickets only.
    ///
    /// # Panics
    ///
    /// With invariant checks compiled in: on a shared ticket or if any other
    /// access is live.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        match self.try_write() {
            Ok(guard) => guard,
            Err(error) => {
                invariant!(false, error);
                self.value.write()
            }
        }
    }
}

/// Guard returned by the blocking [`AccessControlledValue::acquire`].
pub enum AccessGuard<'a, T> {
    /// Shared access (SharedRead / SharedWrite).
    Shared(RwLockReadGuard<'a, T>),
    /// Exclusive access (ExclusiveWrite / Disposal).
    Exclusive(RwLockWriteGuard<'a, T>),
}

impl<T> Deref for AccessGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        match self {
            Self::Shared(guard) => &**guard,
            Self::Exclusive(guard) => &**guard,
        }
    }
}

impl<T> DerefMut for AccessGuard<'_, T> {
    /// # Panics
    ///
    /// Always panics on a shared guard.
    fn deref_mut(&mut self) -> &mut T {
        match self {
            Self::Exclusive(guard) => &mut **guard,
            Self::Shared(_) => crate::invariant::violated(ConfluxError::ModeMismatch {
                mode: AccessMode::SharedRead,
            }),
        }
    }
}

/// One shared value guarded by one access controller.
pub struct AccessControlledValue<T> {
    value: Arc<RwLock<T>>,
    controller: AccessController,
}

impl<T: Default> Default for AccessControlledValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> AccessControlledValue<T> {
    /// Wraps `value` with a fresh controller.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            controller: AccessController::new(),
        }
    }

    /// The controller gating this value.
    #[inline]
    #[must_use]
    pub fn controller(&self) -> &AccessController {
        &self.controller
    }

    /// Acquires `mode` without waiting. Schedule work after the fence, then
    /// call [`release_async`](Self::release_async) with that work's fence.
    pub fn acquire_async(&mut self, mode: AccessMode) -> (Fence, AccessTicket<T>) {
        let fence = self.controller.acquire(mode);
        let ticket = AccessTicket {
            value: Arc::clone(&self.value),
            mode,
        };
        (fence, ticket)
    }

    /// Releases an asynchronous acquisition.
    pub fn release_async(&mut self, done: Fence) {
        self.controller.release(done);
    }

    /// Acquires `mode`, blocking the calling thread until every conflicting
    /// access has completed. Call [`release`](Self::release) after dropping
    /// the guard.
    pub fn acquire(&mut self, mode: AccessMode) -> AccessGuard<'_, T> {
        let fence = self.controller.acquire(mode);
        fence.wait();
        if mode.is_exclusive() {
            let guard = self.value.try_write().unwrap_or_else(|| {
                invariant!(false, ConfluxError::AccessContended { mode });
                self.value.write()
            });
            AccessGuard::Exclusive(guard)
        } else {
            let guard = self.value.try_read().unwrap_or_else(|| {
                invariant!(false, ConfluxError::AccessContended { mode });
                self.value.read()
            });
            AccessGuard::Shared(guard)
        }
    }

    /// Releases a blocking acquisition. The work already happened, so the
    /// release fence is resolved.
    pub fn release(&mut self) {
        self.controller.release(Fence::completed());
    }

    /// Re-arms a disposed value with new contents.
    ///
    /// # Panics
    ///
    /// With invariant checks compiled in: if an acquisition is outstanding.
    pub fn reset(&mut self, value: T, initial: &Fence) {
        invariant!(
            !self.controller.is_acquired(),
            ConfluxError::AcquireWithoutRelease {
                held: AccessMode::ExclusiveWrite,
            }
        );
        self.controller.exclusive_frontier().wait();
        match self.value.try_write() {
            Some(mut guard) => *guard = value,
            None => {
                invariant!(false, ConfluxError::AccessContended { mode: AccessMode::Disposal });
                *self.value.write() = value;
            }
        }
        self.controller.reset(initial);
    }
}

impl<T: Dispose> AccessControlledValue<T> {
    /// Waits for all prior access, disposes the inner value and leaves the
    /// controller disposing until [`reset`](Self::reset).
    pub fn dispose(&mut self) {
        if self.controller.is_disposing() {
            return;
        }
        let mut guard = self.acquire(AccessMode::Disposal);
        guard.dispose();
        drop(guard);
        tracing::debug!("access-controlled value disposed");
    }
}

impl<T> std::fmt::Debug for AccessControlledValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControlledValue")
            .field("state", &self.controller.state())
            .finish_non_exhaustive()
    }
}
