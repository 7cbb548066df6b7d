//! The synchronization state word.

use core::fmt;

use crossbeam_utils::CachePadded;

use super::loom_compat::{AtomicI32, Ordering};

/// A single 32-bit signed state cell.
///
/// Its meaning is defined by the client: zero means free for an exclusive
/// lock, the hold count for [`ReentrantLock`](super::ReentrantLock), the
/// available permits for [`Semaphore`](super::Semaphore). All accesses are
/// `SeqCst` so that a state change and a subsequent queue-status check
/// cannot be reordered against a waiter doing the mirror image.
///
/// Padded to a cache line: the word is the hottest location in every
/// primitive and should not share a line with the queue.
pub struct AtomicState {
    value: CachePadded<AtomicI32>,
}

impl AtomicState {
    /// Creates a state cell holding `initial`.
    pub fn new(initial: i32) -> Self {
        Self {
            value: CachePadded::new(AtomicI32::new(initial)),
        }
    }

    /// Reads the current value.
    #[inline]
    pub fn get(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    /// Unconditionally stores `value`.
    ///
    /// Only the exclusive owner may use this; everyone else must go
    /// through [`compare_and_set`](Self::compare_and_set).
    #[inline]
    pub fn set(&self, value: i32) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Atomically replaces `expect` with `update`. Returns `true` on success.
    #[inline]
    pub fn compare_and_set(&self, expect: i32, update: i32) -> bool {
        self.value
            .compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for AtomicState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for AtomicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicState").field(&self.get()).finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn get_set() {
        let s = AtomicState::new(3);
        assert_eq!(s.get(), 3);
        s.set(-1);
        assert_eq!(s.get(), -1);
    }

    #[test]
    fn cas_only_succeeds_on_expected_value() {
        let s = AtomicState::default();
        assert!(!s.compare_and_set(1, 2));
        assert_eq!(s.get(), 0);
        assert!(s.compare_and_set(0, 2));
        assert_eq!(s.get(), 2);
    }

    #[test]
    fn concurrent_cas_increments_are_not_lost() {
        let s = Arc::new(AtomicState::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        loop {
                            let c = s.get();
                            if s.compare_and_set(c, c + 1) {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.get(), 20_000);
    }

    #[test]
    fn debug_shows_value() {
        assert_eq!(format!("{:?}", AtomicState::new(7)), "AtomicState(7)");
    }
}
