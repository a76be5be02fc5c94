//! # Access Control
//!
//! Mutexes serialize by blocking. Here nothing blocks on the data path:
//!
//! ```text
//! producer jobs  ── SharedWrite ──┐
//!                                 ├──> [AccessController] ──> fence to wait on
//! consolidator   ── Exclusive ────┤
//! reader jobs    ── SharedRead ───┘
//! ```
//!
//! A caller asks for a mode, gets a fence, schedules its work after that
//! fence and hands the work's fence back on release.

mod controller;
mod value;

pub use controller::{AccessController, AccessMode, ControllerState};
pub use value::{AccessControlledValue, AccessGuard, AccessTicket, Dispose};
