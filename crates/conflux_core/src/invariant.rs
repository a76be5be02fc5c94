//! # Invariant Checks
//!
//! Every usage-ordering, dependency-chain and duplicate-key check in the
//! workspace goes through [`invariant!`](crate::invariant!). One switch gates
//! them all: checks run when `debug_assertions` are on or the
//! `strict-invariants` feature is enabled, and compile to nothing otherwise.
//!
//! A violated invariant is never recoverable. It logs the error and panics
//! with the error's message.

use crate::error::ConfluxError;

/// Whether invariant checks are compiled in.
pub const ENABLED: bool = cfg!(any(debug_assertions, feature = "strict-invariants"));

/// Reports a violated invariant. Never returns.
///
/// # Panics
///
/// Always.
#[cold]
#[inline(never)]
#[track_caller]
pub fn violated(error: ConfluxError) -> ! {
    tracing::error!(%error, "invariant violated");
    panic!("{error}");
}

/// Checks an invariant when checks are compiled in.
///
/// The condition is not evaluated at all when checks are disabled, so it may
/// be arbitrarily expensive.
///
/// ```rust,ignore
/// invariant!(self.state == State::Unacquired, ConfluxError::DoubleRelease);
/// ```
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $error:expr $(,)?) => {
        if $crate::invariant::ENABLED && !($cond) {
            $crate::invariant::violated($error);
        }
    };
}
