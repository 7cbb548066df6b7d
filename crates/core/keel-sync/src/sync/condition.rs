//! Condition objects for exclusive synchronizers.
//!
//! A [`Condition`] is created by, and permanently bound to, one
//! [`Synchronizer`](super::Synchronizer). Waiting fully releases the
//! synchronizer, parks on the condition's own wait list, and re-acquires
//! with the saved hold count before returning, whatever the outcome.
//!
//! Signal and cancellation race on the node's `COND` bit: whoever clears it
//! decides whether the node is transferred into the main queue by the
//! signaller or re-enqueued by its own unit.

use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::SPIN_FOR_TIMEOUT_THRESHOLD;
use super::loom_compat;
use super::node::{NodeStatus, WaitNode};
use super::spinlock::SpinLock;
use super::synchronizer::ConditionHost;
use crate::error::{StateViolation, SyncError};
use crate::unit::{Unit, UnitId};

/// A condition variable bound to one exclusive synchronizer.
pub struct Condition {
    host: Arc<dyn ConditionHost>,
    waiters: SpinLock<VecDeque<Arc<WaitNode>>>,
}

impl Condition {
    pub(crate) fn new(host: Arc<dyn ConditionHost>) -> Self {
        Self {
            host,
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    pub(crate) fn host_ptr(&self) -> *const dyn ConditionHost {
        Arc::as_ptr(&self.host)
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters
            .lock()
            .iter()
            .filter(|n| n.status().contains(NodeStatus::COND))
            .count()
    }

    pub(crate) fn waiter_ids(&self) -> Vec<UnitId> {
        self.waiters
            .lock()
            .iter()
            .filter(|n| n.status().contains(NodeStatus::COND))
            .map(|n| n.unit_id())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Waiting
    // -----------------------------------------------------------------------

    /// Waits until signalled, ignoring interrupts.
    ///
    /// An interrupt that arrives meanwhile stays set on the unit.
    pub fn wait_uninterruptibly(&self) -> Result<(), SyncError> {
        self.wait_inner(false, None).map(drop)
    }

    /// Waits until signalled or interrupted.
    ///
    /// On [`SyncError::Interrupted`] the lock has been re-acquired with its
    /// previous hold count. An interrupt that arrives after the signal is
    /// left set on the unit instead.
    pub fn wait(&self) -> Result<(), SyncError> {
        self.wait_inner(true, None).map(drop)
    }

    /// Waits until signalled, interrupted, or `timeout` elapses.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, SyncError> {
        self.wait_inner(true, Some(Instant::now().checked_add(timeout)))
    }

    /// Waits until signalled, interrupted, or `deadline` passes.
    ///
    /// Returns `Ok(false)` if the deadline passed first.
    pub fn wait_until(&self, deadline: Instant) -> Result<bool, SyncError> {
        self.wait_inner(true, Some(Some(deadline)))
    }

    /// Adds the caller to the wait list and fully releases the host.
    fn enable_wait(&self) -> Result<(Arc<WaitNode>, i32), SyncError> {
        if !self.host.is_held_exclusively() {
            log::warn!(
                "condition: wait by unit {} without holding the lock",
                Unit::current_id()
            );
            return Err(SyncError::IllegalState(StateViolation::NotHeld));
        }
        let node = WaitNode::condition();
        self.waiters.lock().push_back(Arc::clone(&node));
        match self.host.fully_release() {
            Ok(saved) => Ok((node, saved)),
            Err(e) => {
                self.remove(&node);
                node.mark_cancelled();
                Err(e)
            }
        }
    }

    fn remove(&self, node: &Arc<WaitNode>) {
        self.waiters.lock().retain(|n| !Arc::ptr_eq(n, node));
    }

    /// `timed` is `Some(None)` for a timeout too large to represent.
    fn wait_inner(
        &self,
        interruptible: bool,
        timed: Option<Option<Instant>>,
    ) -> Result<bool, SyncError> {
        if interruptible && Unit::take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        let deadline = timed.flatten();
        let (node, saved) = self.enable_wait()?;
        log::trace!("condition: unit {} waiting", node.unit_id());

        let mut interrupted = false;
        let mut cancelled = false;
        while !node.is_queued() {
            if interruptible && Unit::take_interrupt() {
                interrupted = true;
            }
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let expired = remaining.is_some_and(|r| r.is_zero());

            if interrupted || expired {
                if node.unset_flags(NodeStatus::COND).contains(NodeStatus::COND) {
                    cancelled = true;
                    break;
                }
                // Lost the race: a signaller is transferring the node.
                loom_compat::yield_now();
            } else if node.status().contains(NodeStatus::COND) {
                match remaining {
                    None => Unit::park(),
                    Some(r) if r > SPIN_FOR_TIMEOUT_THRESHOLD => Unit::park_timeout(r),
                    Some(_) => loom_compat::yield_now(),
                }
            } else {
                loom_compat::yield_now();
            }
        }

        if cancelled {
            self.remove(&node);
            log::debug!(
                "condition: unit {} stopped waiting ({})",
                node.unit_id(),
                if interrupted { "interrupted" } else { "timed out" }
            );
        }
        node.clear_status();
        self.host.reacquire(node, saved)?;

        if cancelled {
            return if interrupted {
                Err(SyncError::Interrupted)
            } else {
                Ok(false)
            };
        }
        if interrupted {
            Unit::reassert_interrupt();
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Signalling
    // -----------------------------------------------------------------------

    /// Moves the longest-waiting unit to the synchronizer's queue.
    ///
    /// The caller must hold the synchronizer exclusively.
    pub fn signal(&self) -> Result<(), SyncError> {
        self.do_signal(false)
    }

    /// Moves every waiting unit to the synchronizer's queue.
    ///
    /// The caller must hold the synchronizer exclusively.
    pub fn signal_all(&self) -> Result<(), SyncError> {
        self.do_signal(true)
    }

    fn do_signal(&self, all: bool) -> Result<(), SyncError> {
        if !self.host.is_held_exclusively() {
            log::warn!(
                "condition: signal by unit {} without holding the lock",
                Unit::current_id()
            );
            return Err(SyncError::IllegalState(StateViolation::NotHeld));
        }
        let queue = self.host.core().queue();
        loop {
            let Some(node) = self.waiters.lock().pop_front() else {
                break;
            };
            if node.unset_flags(NodeStatus::COND).contains(NodeStatus::COND) {
                log::debug!("condition: transferring unit {}", node.unit_id());
                queue.enqueue(node);
                if !all {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("waiters", &self.waiter_ids())
            .finish_non_exhaustive()
    }
}
