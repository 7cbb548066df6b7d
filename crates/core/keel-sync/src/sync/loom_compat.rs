//! Loom compatibility shim.
//!
//! When compiled with `cfg(loom)`, re-exports loom's atomics and thread
//! primitives. Otherwise, re-exports `std::sync::atomic` and `std::thread`.
//!
//! This allows the synchronizers to be tested under loom's deterministic
//! scheduler without code changes. Loom has no timed park; under loom a
//! timed park degrades to a yield, which callers already treat as a
//! spurious wakeup.

use core::time::Duration;

use crossbeam_utils::Backoff;

// ---------------------------------------------------------------------------
// Loom mode
// ---------------------------------------------------------------------------

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
#[cfg(loom)]
pub(crate) use loom::thread::{Thread, current, park, yield_now};
#[cfg(loom)]
pub(crate) use loom::thread_local;

#[cfg(loom)]
pub(crate) fn park_timeout(_dur: Duration) {
    loom::thread::yield_now();
}

#[cfg(loom)]
pub(crate) fn spin_wait(_backoff: &Backoff) {
    loom::thread::yield_now();
}

// ---------------------------------------------------------------------------
// Normal mode
// ---------------------------------------------------------------------------

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
#[cfg(not(loom))]
pub(crate) use std::thread::{Thread, current, park, yield_now};
#[cfg(not(loom))]
pub(crate) use std::thread_local;

#[cfg(not(loom))]
pub(crate) fn park_timeout(dur: Duration) {
    std::thread::park_timeout(dur);
}

#[cfg(not(loom))]
pub(crate) fn spin_wait(backoff: &Backoff) {
    backoff.snooze();
}
