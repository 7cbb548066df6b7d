//! Counting semaphore.
//!
//! [`Semaphore`] is the shared-mode client of [`Synchronizer`]: the state
//! word is the number of available permits. Multi-permit acquisition is
//! all-or-nothing; a request that cannot be fully satisfied leaves the
//! count untouched and queues.
//!
//! The count may start negative, in which case releases must bring it up
//! before any acquire succeeds.

use core::fmt;
use std::time::Duration;

use super::synchronizer::{SyncCore, SyncPolicy, Synchronizer};
use super::Fairness;
use crate::error::{ArgumentViolation, OverflowKind, SyncError};
use crate::unit::UnitId;

/// State-transition rules of [`Semaphore`].
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreSync {
    fair: bool,
}

impl SemaphoreSync {
    /// Creates the policy for the given admission order.
    pub const fn new(fairness: Fairness) -> Self {
        Self {
            fair: fairness.is_fair(),
        }
    }

    /// Takes `acquires` permits if available, ignoring the queue.
    ///
    /// Returns the permits left afterwards; negative means nothing was taken.
    pub fn nonfair_try_acquire_shared(&self, core: &SyncCore, acquires: i32) -> i32 {
        loop {
            let available = core.state().get();
            let remaining = available.saturating_sub(acquires);
            if remaining < 0 || core.state().compare_and_set(available, remaining) {
                return remaining;
            }
        }
    }

    fn reduce(core: &SyncCore, reductions: i32) -> Result<(), SyncError> {
        loop {
            let current = core.state().get();
            let Some(next) = current.checked_sub(reductions) else {
                log::warn!("semaphore: permit count underflow");
                return Err(SyncError::Overflow(OverflowKind::PermitUnderflow));
            };
            if core.state().compare_and_set(current, next) {
                return Ok(());
            }
        }
    }

    fn drain(core: &SyncCore) -> i32 {
        loop {
            let current = core.state().get();
            if current == 0 || core.state().compare_and_set(current, 0) {
                return current;
            }
        }
    }
}

impl SyncPolicy for SemaphoreSync {
    fn try_acquire_shared(&self, core: &SyncCore, acquires: i32) -> Result<i32, SyncError> {
        if self.fair && core.has_queued_predecessors() {
            return Ok(-1);
        }
        Ok(self.nonfair_try_acquire_shared(core, acquires))
    }

    fn try_release_shared(&self, core: &SyncCore, releases: i32) -> Result<bool, SyncError> {
        loop {
            let current = core.state().get();
            let Some(next) = current.checked_add(releases) else {
                log::warn!("semaphore: maximum permit count exceeded");
                return Err(SyncError::Overflow(OverflowKind::PermitCount));
            };
            if core.state().compare_and_set(current, next) {
                return Ok(true);
            }
        }
    }
}

fn check_permits(n: i32) -> Result<(), SyncError> {
    if n < 0 {
        return Err(SyncError::IllegalArgument(
            ArgumentViolation::NegativePermits,
        ));
    }
    Ok(())
}

/// A counting semaphore.
pub struct Semaphore {
    sync: Synchronizer<SemaphoreSync>,
}

impl Semaphore {
    /// Creates an unfair semaphore with `permits` initially available.
    pub fn new(permits: i32) -> Self {
        Self::with_fairness(permits, Fairness::Unfair)
    }

    /// Creates a semaphore with the given admission order.
    pub fn with_fairness(permits: i32, fairness: Fairness) -> Self {
        Self {
            sync: Synchronizer::new(SemaphoreSync::new(fairness), permits),
        }
    }

    /// Acquires one permit, blocking until available or interrupted.
    pub fn acquire(&self) -> Result<(), SyncError> {
        self.sync.acquire_shared_interruptibly(1)
    }

    /// Acquires `n` permits at once, blocking until available or interrupted.
    pub fn acquire_many(&self, n: i32) -> Result<(), SyncError> {
        check_permits(n)?;
        self.sync.acquire_shared_interruptibly(n)
    }

    /// Acquires one permit, ignoring interrupts.
    pub fn acquire_uninterruptibly(&self) -> Result<(), SyncError> {
        self.sync.acquire_shared(1)
    }

    /// Acquires `n` permits at once, ignoring interrupts.
    pub fn acquire_many_uninterruptibly(&self, n: i32) -> Result<(), SyncError> {
        check_permits(n)?;
        self.sync.acquire_shared(n)
    }

    /// Takes one permit if available right now.
    ///
    /// Barges even on a fair semaphore.
    pub fn try_acquire(&self) -> bool {
        self.sync
            .policy()
            .nonfair_try_acquire_shared(self.sync.core(), 1)
            >= 0
    }

    /// Takes `n` permits if all are available right now. Barges.
    pub fn try_acquire_many(&self, n: i32) -> Result<bool, SyncError> {
        check_permits(n)?;
        Ok(self
            .sync
            .policy()
            .nonfair_try_acquire_shared(self.sync.core(), n)
            >= 0)
    }

    /// Acquires one permit, waiting at most `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Result<bool, SyncError> {
        self.sync.try_acquire_shared_for(1, timeout)
    }

    /// Acquires `n` permits, waiting at most `timeout`.
    pub fn try_acquire_many_for(&self, n: i32, timeout: Duration) -> Result<bool, SyncError> {
        check_permits(n)?;
        self.sync.try_acquire_shared_for(n, timeout)
    }

    /// Returns one permit.
    ///
    /// The caller need not have acquired it.
    pub fn release(&self) -> Result<(), SyncError> {
        self.sync.release_shared(1).map(drop)
    }

    /// Returns `n` permits.
    pub fn release_many(&self, n: i32) -> Result<(), SyncError> {
        check_permits(n)?;
        self.sync.release_shared(n).map(drop)
    }

    /// Returns the current permit count. Negative if the semaphore was
    /// created or reduced below zero.
    pub fn available_permits(&self) -> i32 {
        self.sync.state()
    }

    /// Takes every available permit and returns how many were taken.
    ///
    /// A negative count is reset to zero and returned as is.
    pub fn drain_permits(&self) -> i32 {
        SemaphoreSync::drain(self.sync.core())
    }

    /// Lowers the count by `reduction` without blocking.
    pub fn reduce_permits(&self, reduction: i32) -> Result<(), SyncError> {
        check_permits(reduction)?;
        SemaphoreSync::reduce(self.sync.core(), reduction)
    }

    /// Acquires one permit and returns a guard that releases it on drop.
    pub fn permit(&self) -> Result<SemaphorePermit<'_>, SyncError> {
        self.acquire()?;
        Ok(SemaphorePermit {
            sem: self,
            permits: 1,
        })
    }

    /// Like [`permit`](Self::permit), but fails instead of blocking.
    pub fn try_permit(&self) -> Option<SemaphorePermit<'_>> {
        self.try_acquire().then(|| SemaphorePermit {
            sem: self,
            permits: 1,
        })
    }

    /// Returns `true` for a fair semaphore.
    pub fn is_fair(&self) -> bool {
        self.sync.policy().fair
    }

    /// Returns `true` if any unit is waiting for permits.
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    /// Returns an estimate of the number of waiting units.
    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    /// Returns the waiting units, longest-waiting first.
    pub fn queued_units(&self) -> Vec<UnitId> {
        self.sync.queued_units()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available_permits())
            .field("fair", &self.is_fair())
            .field("queued", &self.queue_length())
            .finish()
    }
}

impl fmt::Display for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Semaphore[Permits = {}]", self.available_permits())
    }
}

/// RAII guard holding semaphore permits.
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
    permits: i32,
}

impl SemaphorePermit<'_> {
    /// Number of permits held.
    pub fn permits(&self) -> i32 {
        self.permits
    }

    /// Keeps the permits acquired: nothing is released on drop.
    pub fn forget(mut self) {
        self.permits = 0;
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if self.permits > 0 {
            if let Err(e) = self.sem.release_many(self.permits) {
                log::error!("semaphore: permit release failed: {e}");
            }
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_and_release_adjust_count() {
        let sem = Semaphore::new(3);
        sem.acquire().unwrap();
        sem.acquire_many(2).unwrap();
        assert_eq!(sem.available_permits(), 0);
        assert!(!sem.try_acquire());
        sem.release_many(2).unwrap();
        assert_eq!(sem.available_permits(), 2);
        assert_eq!(sem.to_string(), "Semaphore[Permits = 2]");
    }

    #[test]
    fn negative_counts_are_illegal() {
        let sem = Semaphore::new(1);
        let err = Err(SyncError::IllegalArgument(ArgumentViolation::NegativePermits));
        assert_eq!(sem.acquire_many(-1), err);
        assert_eq!(sem.release_many(-1), err);
        assert_eq!(sem.reduce_permits(-1), err);
        assert_eq!(
            sem.try_acquire_many(-1),
            Err(SyncError::IllegalArgument(ArgumentViolation::NegativePermits))
        );
        assert_eq!(sem.available_permits(), 1);
    }

    #[test]
    fn multi_permit_request_is_all_or_nothing() {
        let sem = Semaphore::new(2);
        assert_eq!(sem.try_acquire_many(3), Ok(false));
        assert_eq!(sem.available_permits(), 2);
        assert_eq!(sem.try_acquire_many(2), Ok(true));
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn release_overflow_is_reported() {
        let sem = Semaphore::new(i32::MAX);
        assert_eq!(
            sem.release(),
            Err(SyncError::Overflow(OverflowKind::PermitCount))
        );
        assert_eq!(sem.available_permits(), i32::MAX);
    }

    #[test]
    fn reduce_underflow_is_reported() {
        let sem = Semaphore::new(-1);
        sem.reduce_permits(i32::MAX).unwrap();
        assert_eq!(sem.available_permits(), i32::MIN);
        assert_eq!(
            sem.reduce_permits(1),
            Err(SyncError::Overflow(OverflowKind::PermitUnderflow))
        );
        assert_eq!(sem.available_permits(), i32::MIN);

        let sem = Semaphore::new(-2);
        assert_eq!(
            sem.reduce_permits(i32::MAX),
            Err(SyncError::Overflow(OverflowKind::PermitUnderflow))
        );
        sem.reduce_permits(2).unwrap();
        assert_eq!(sem.available_permits(), -4);
    }

    #[test]
    fn negative_initial_count_must_be_released_up() {
        let sem = Semaphore::new(-1);
        assert!(!sem.try_acquire());
        sem.release().unwrap();
        assert!(!sem.try_acquire());
        sem.release().unwrap();
        assert!(sem.try_acquire());
    }

    #[test]
    fn drain_returns_previous_count() {
        let sem = Semaphore::new(5);
        assert_eq!(sem.drain_permits(), 5);
        assert_eq!(sem.drain_permits(), 0);
        sem.reduce_permits(2).unwrap();
        assert_eq!(sem.drain_permits(), -2);
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn permit_guard_releases_on_drop() {
        let sem = Semaphore::with_fairness(1, Fairness::Fair);
        assert!(sem.is_fair());
        {
            let permit = sem.permit().unwrap();
            assert_eq!(permit.permits(), 1);
            assert!(sem.try_permit().is_none());
        }
        assert_eq!(sem.available_permits(), 1);
        sem.try_permit().unwrap().forget();
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn release_wakes_blocked_acquirer() {
        let sem = Arc::new(Semaphore::new(0));
        let s = Arc::clone(&sem);
        let handle = thread::spawn(move || s.acquire_many_uninterruptibly(2));
        while sem.queue_length() == 0 {
            thread::yield_now();
        }
        sem.release().unwrap();
        assert_eq!(sem.available_permits(), 1);
        sem.release().unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(sem.available_permits(), 0);
        assert!(!sem.has_queued_threads());
    }

    #[test]
    fn zero_timeout_fails_fast() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.try_acquire_for(Duration::ZERO), Ok(false));
        assert_eq!(sem.try_acquire_many_for(1, Duration::from_millis(5)), Ok(false));
        assert!(sem.queued_units().is_empty());
    }
}
