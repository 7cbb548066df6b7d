//! Shared helpers for the multi-unit integration tests.

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on how long any helper waits before failing the test.
pub const PATIENCE: Duration = Duration::from_secs(10);

/// Spins (yielding) until `cond` holds, panicking after [`PATIENCE`].
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < PATIENCE, "timed out waiting for {what}");
        thread::yield_now();
    }
}

/// Gives other units a chance to run without asserting anything.
pub fn settle() {
    thread::sleep(Duration::from_millis(20));
}
