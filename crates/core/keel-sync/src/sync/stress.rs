//! Lock contention stress delays.
//!
//! Injects random spin delays on the acquire/release slow paths to widen
//! race windows and surface timing-dependent bugs. Gated behind
//! `cfg(keel_lock_stress)`.
//!
//! ## Design
//!
//! - **PRNG**: xorshift64, per-thread state, seeded from a global base so
//!   that every thread diverges.
//! - **Delay**: spins for a random duration in `[0, max_us)` microseconds,
//!   measured with `Instant`.

use core::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Maximum stress delay in microseconds. Set by `init()`.
static MAX_US: AtomicU32 = AtomicU32::new(10);

/// Base seed. Each thread mixes in a unique counter.
static SEED: AtomicU64 = AtomicU64::new(0xDEAD_BEEF_CAFE_BABE);

/// Hands each thread a distinct stream index.
static STREAM: AtomicU64 = AtomicU64::new(0);

std::thread_local! {
    static PRNG_STATE: Cell<u64> = const { Cell::new(0) };
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Initializes the stress delay subsystem.
///
/// - `max_us`: maximum random delay in microseconds. `0` disables delays.
/// - `seed`: base PRNG seed. If 0, a fallback constant is used to avoid a
///   stuck-at-zero xorshift.
///
/// Threads that already drew a number keep their current stream.
pub fn init(max_us: u32, seed: u64) {
    MAX_US.store(max_us, Ordering::Relaxed);
    let base = if seed == 0 { 0xDEAD_BEEF_CAFE_BABE } else { seed };
    SEED.store(base, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// PRNG
// ---------------------------------------------------------------------------

fn thread_seed() -> u64 {
    let base = SEED.load(Ordering::Relaxed);
    let stream = STREAM.fetch_add(1, Ordering::Relaxed);
    let seed = base
        .wrapping_add(stream)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    // Avoid zero (xorshift fixed point).
    if seed == 0 { base ^ 0x1234_5678 } else { seed }
}

/// Returns the next pseudo-random u64 for the current thread.
#[inline]
fn next_random() -> u64 {
    PRNG_STATE.with(|state| {
        let mut x = state.get();
        if x == 0 {
            x = thread_seed();
        }
        // xorshift64
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        x
    })
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// Spins for a random duration in `[0, max_us)` microseconds.
///
/// Must not acquire any lock: it is called from inside lock slow paths.
#[inline]
pub fn stress_delay() {
    let max_us = MAX_US.load(Ordering::Relaxed);
    if max_us == 0 {
        return;
    }

    let target_ns = next_random() % (u64::from(max_us) * 1000);
    if target_ns == 0 {
        return;
    }

    let target = Duration::from_nanos(target_ns);
    let start = Instant::now();
    while start.elapsed() < target {
        core::hint::spin_loop();
    }
}
