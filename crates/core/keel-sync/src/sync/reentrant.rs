//! Reentrant mutual exclusion lock.
//!
//! [`ReentrantLock`] is the exclusive-mode client of [`Synchronizer`]. The
//! state word is the owner's hold count: `0` is unlocked, `n > 0` is held
//! `n` times by [`SyncCore::owner`].
//!
//! Under [`Fairness::Fair`] a blocking acquire never overtakes a queued
//! unit. [`try_lock`](ReentrantLock::try_lock) is the deliberate exception:
//! it barges regardless of the policy, so it can succeed the instant the
//! lock is free.

use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::condition::Condition;
use super::synchronizer::{SyncCore, SyncPolicy, Synchronizer};
use super::Fairness;
use crate::error::{OverflowKind, StateViolation, SyncError};
use crate::unit::{Unit, UnitId};

/// State-transition rules of [`ReentrantLock`].
#[derive(Debug, Clone, Copy)]
pub struct ReentrantSync {
    fair: bool,
}

impl ReentrantSync {
    /// Creates the policy for the given admission order.
    pub const fn new(fairness: Fairness) -> Self {
        Self {
            fair: fairness.is_fair(),
        }
    }

    /// Acquires without consulting the queue.
    pub fn nonfair_try_acquire(&self, core: &SyncCore, acquires: i32) -> Result<bool, SyncError> {
        self.acquire_with(core, acquires, false)
    }

    fn acquire_with(&self, core: &SyncCore, acquires: i32, fair: bool) -> Result<bool, SyncError> {
        let me = Unit::current_id();
        let c = core.state().get();
        if c == 0 {
            if (fair && core.has_queued_predecessors())
                || !core.state().compare_and_set(0, acquires)
            {
                return Ok(false);
            }
            core.set_owner(Some(me));
            return Ok(true);
        }
        if core.owner() == Some(me) {
            let Some(next) = c.checked_add(acquires) else {
                log::warn!("reentrant: unit {me} exceeded the maximum hold count");
                return Err(SyncError::Overflow(OverflowKind::HoldCount));
            };
            // Only the owner writes the state while it is held.
            core.state().set(next);
            return Ok(true);
        }
        Ok(false)
    }
}

impl SyncPolicy for ReentrantSync {
    fn try_acquire(&self, core: &SyncCore, acquires: i32) -> Result<bool, SyncError> {
        self.acquire_with(core, acquires, self.fair)
    }

    fn try_release(&self, core: &SyncCore, releases: i32) -> Result<bool, SyncError> {
        let me = Unit::current_id();
        if core.owner() != Some(me) {
            log::warn!("reentrant: unit {me} released a lock it does not own");
            return Err(SyncError::IllegalState(StateViolation::NotOwner));
        }
        let c = core.state().get() - releases;
        let free = c == 0;
        if free {
            core.set_owner(None);
        }
        core.state().set(c);
        Ok(free)
    }
}

/// A reentrant mutual exclusion lock with condition support.
///
/// Unlike `std::sync::Mutex` it guards no data: callers pair
/// [`lock`](Self::lock) with [`unlock`](Self::unlock), or hold a
/// [`ReentrantLockGuard`].
pub struct ReentrantLock {
    sync: Arc<Synchronizer<ReentrantSync>>,
}

impl ReentrantLock {
    /// Creates an unfair lock.
    pub fn new() -> Self {
        Self::with_fairness(Fairness::Unfair)
    }

    /// Creates a lock with the given admission order.
    pub fn with_fairness(fairness: Fairness) -> Self {
        Self {
            sync: Arc::new(Synchronizer::new(ReentrantSync::new(fairness), 0)),
        }
    }

    /// Acquires the lock, blocking uninterruptibly.
    ///
    /// Returns immediately if the caller already holds it, incrementing the
    /// hold count.
    pub fn lock(&self) -> Result<(), SyncError> {
        self.sync.acquire(1)
    }

    /// Acquires the lock unless the unit is interrupted.
    pub fn lock_interruptibly(&self) -> Result<(), SyncError> {
        self.sync.acquire_interruptibly(1)
    }

    /// Acquires the lock only if it is free or already held by the caller.
    ///
    /// Barges even on a fair lock.
    pub fn try_lock(&self) -> Result<bool, SyncError> {
        self.sync.policy().nonfair_try_acquire(self.sync.core(), 1)
    }

    /// Acquires the lock, waiting at most `timeout`. Honors fairness and
    /// interrupts; returns `Ok(false)` on timeout.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, SyncError> {
        self.sync.try_acquire_for(1, timeout)
    }

    /// Decrements the hold count, releasing the lock when it reaches zero.
    pub fn unlock(&self) -> Result<(), SyncError> {
        self.sync.release(1).map(drop)
    }

    /// Acquires the lock and returns a guard that unlocks on drop.
    pub fn guard(&self) -> Result<ReentrantLockGuard<'_>, SyncError> {
        self.lock()?;
        Ok(ReentrantLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Creates a condition bound to this lock.
    pub fn new_condition(&self) -> Condition {
        self.sync.new_condition()
    }

    /// Returns the caller's hold count, `0` if it does not hold the lock.
    pub fn hold_count(&self) -> i32 {
        if self.is_held_by_current_unit() {
            self.sync.state()
        } else {
            0
        }
    }

    /// Returns `true` if the calling unit holds the lock.
    pub fn is_held_by_current_unit(&self) -> bool {
        self.sync.is_held_exclusively()
    }

    /// Returns `true` if any unit holds the lock.
    pub fn is_locked(&self) -> bool {
        self.sync.state() != 0
    }

    /// Returns `true` for a fair lock.
    pub fn is_fair(&self) -> bool {
        self.sync.policy().fair
    }

    /// Returns the owning unit, if any. A snapshot.
    pub fn owner(&self) -> Option<UnitId> {
        self.sync.core().owner()
    }

    /// Returns `true` if any unit is waiting to acquire.
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    /// Returns `true` if `unit` is waiting to acquire.
    pub fn has_queued_unit(&self, unit: UnitId) -> bool {
        self.sync.is_queued(unit)
    }

    /// Returns an estimate of the number of waiting units.
    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    /// Returns the waiting units, longest-waiting first.
    pub fn queued_units(&self) -> Vec<UnitId> {
        self.sync.queued_units()
    }

    /// Returns `true` if any unit waits on `condition`. Requires holding the
    /// lock; `condition` must come from this lock.
    pub fn has_waiters(&self, condition: &Condition) -> Result<bool, SyncError> {
        self.sync.has_waiters(condition)
    }

    /// Returns an estimate of the units waiting on `condition`.
    pub fn wait_queue_length(&self, condition: &Condition) -> Result<usize, SyncError> {
        self.sync.wait_queue_length(condition)
    }

    /// Returns the units waiting on `condition`.
    pub fn waiting_units(&self, condition: &Condition) -> Result<Vec<UnitId>, SyncError> {
        self.sync.waiting_units(condition)
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("fair", &self.is_fair())
            .field("owner", &self.owner())
            .field("holds", &self.sync.state())
            .field("queued", &self.queue_length())
            .finish()
    }
}

impl fmt::Display for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner() {
            Some(unit) => write!(f, "ReentrantLock[Locked by unit {unit}]"),
            None => f.write_str("ReentrantLock[Unlocked]"),
        }
    }
}

/// RAII guard for one hold of a [`ReentrantLock`].
///
/// Not `Send`: the hold belongs to the unit that acquired it.
pub struct ReentrantLockGuard<'a> {
    lock: &'a ReentrantLock,
    _not_send: PhantomData<*const ()>,
}

impl ReentrantLockGuard<'_> {
    /// The lock this guard holds.
    pub fn lock(&self) -> &ReentrantLock {
        self.lock
    }
}

impl Drop for ReentrantLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            log::error!("reentrant: guard release failed: {e}");
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn nested_holds_need_matching_unlocks() {
        let lock = ReentrantLock::new();
        for n in 1..=3 {
            lock.lock().unwrap();
            assert_eq!(lock.hold_count(), n);
        }
        assert!(lock.is_held_by_current_unit());
        lock.unlock().unwrap();
        lock.unlock().unwrap();
        assert!(lock.is_locked());
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
        assert_eq!(lock.owner(), None);
    }

    #[test]
    fn unlock_without_holding_is_illegal_state() {
        let lock = ReentrantLock::new();
        assert_eq!(
            lock.unlock(),
            Err(SyncError::IllegalState(StateViolation::NotOwner))
        );
        lock.lock().unwrap();
        lock.unlock().unwrap();
        // Double unlock.
        assert_eq!(
            lock.unlock(),
            Err(SyncError::IllegalState(StateViolation::NotOwner))
        );
    }

    #[test]
    fn unlock_from_other_unit_fails() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock().unwrap();
        let l = Arc::clone(&lock);
        let err = thread::spawn(move || l.unlock()).join().unwrap();
        assert_eq!(err, Err(SyncError::IllegalState(StateViolation::NotOwner)));
        assert_eq!(lock.hold_count(), 1);
        lock.unlock().unwrap();
    }

    #[test]
    fn hold_count_overflow_is_reported() {
        let lock = ReentrantLock::new();
        lock.lock().unwrap();
        lock.sync.core().state().set(i32::MAX);
        assert_eq!(
            lock.lock(),
            Err(SyncError::Overflow(OverflowKind::HoldCount))
        );
        assert_eq!(
            lock.try_lock(),
            Err(SyncError::Overflow(OverflowKind::HoldCount))
        );
        assert_eq!(lock.hold_count(), i32::MAX);
    }

    #[test]
    fn try_lock_fails_while_held_elsewhere() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock().unwrap();
        let l = Arc::clone(&lock);
        assert_eq!(thread::spawn(move || l.try_lock()).join().unwrap(), Ok(false));
        assert_eq!(lock.try_lock(), Ok(true));
        assert_eq!(lock.hold_count(), 2);
    }

    #[test]
    fn guard_unlocks_on_drop() {
        let lock = ReentrantLock::with_fairness(Fairness::Fair);
        assert!(lock.is_fair());
        {
            let guard = lock.guard().unwrap();
            assert_eq!(guard.lock().hold_count(), 1);
            let _inner = lock.guard().unwrap();
            assert_eq!(lock.hold_count(), 2);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn fair_try_lock_barges_past_queue() {
        let lock = Arc::new(ReentrantLock::with_fairness(Fairness::Fair));
        lock.lock().unwrap();
        let l = Arc::clone(&lock);
        let queued = thread::spawn(move || {
            l.lock().unwrap();
            l.unlock().unwrap();
        });
        while lock.queue_length() == 0 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));

        // Free the state word without waking the queued unit, opening the
        // window in which fairness and barging disagree.
        let core = lock.sync.core();
        core.set_owner(None);
        core.state().set(0);

        assert_eq!(lock.try_lock_for(Duration::ZERO), Ok(false));
        assert_eq!(lock.try_lock(), Ok(true));
        assert!(lock.is_held_by_current_unit());

        lock.unlock().unwrap();
        queued.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn display_reports_owner() {
        let lock = ReentrantLock::default();
        assert_eq!(lock.to_string(), "ReentrantLock[Unlocked]");
        lock.lock().unwrap();
        assert_eq!(
            lock.to_string(),
            format!("ReentrantLock[Locked by unit {}]", Unit::current_id())
        );
        lock.unlock().unwrap();
    }
}
