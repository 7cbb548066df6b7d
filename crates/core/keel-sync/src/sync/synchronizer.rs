//! Generic acquire/release engine.
//!
//! A [`Synchronizer`] couples an [`AtomicState`] word and a [`WaitQueue`]
//! with a [`SyncPolicy`] that decides what the state means. The engine owns
//! all queueing, parking, timeout, and interrupt handling; a policy only
//! answers "can I take / give back `arg` right now?".
//!
//! ## Acquire loop
//!
//! 1. A unit that is not queued, or is first in the queue, tries the policy.
//! 2. On failure it creates a node, then enqueues it, then publishes
//!    `WAITING`, re-trying the policy after each step.
//! 3. Only then does it park. After every wakeup it clears its status and
//!    starts over at step 1.
//!
//! Releasers change the state first and then clear `WAITING` on the first
//! node and unpark it. Both sides use `SeqCst`, so either the releaser sees
//! `WAITING` or the waiter sees the released state.

use core::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::condition::Condition;
use super::loom_compat::{self, AtomicU64, Ordering};
use super::node::{NodeMode, NodeStatus, WaitNode};
use super::state::AtomicState;
use super::waitqueue::WaitQueue;
use super::SPIN_FOR_TIMEOUT_THRESHOLD;
use crate::error::{ArgumentViolation, StateViolation, SyncError};
use crate::unit::{Unit, UnitId};

#[cfg(keel_lock_stress)]
use super::stress::stress_delay;

#[cfg(not(keel_lock_stress))]
#[inline(always)]
fn stress_delay() {}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// The state-transition rules of a concrete synchronizer.
///
/// Implement the exclusive pair, the shared pair, or both. Unimplemented
/// modes report [`StateViolation::UnsupportedMode`]. All methods must be
/// non-blocking; a failed CAS is retried inside the method, not reported.
pub trait SyncPolicy: Send + Sync + 'static {
    /// Attempts to acquire `arg` in exclusive mode.
    fn try_acquire(&self, core: &SyncCore, arg: i32) -> Result<bool, SyncError> {
        let _ = (core, arg);
        Err(unsupported("try_acquire"))
    }

    /// Releases `arg` in exclusive mode. Returns `true` once fully released,
    /// which wakes the first queued unit.
    fn try_release(&self, core: &SyncCore, arg: i32) -> Result<bool, SyncError> {
        let _ = (core, arg);
        Err(unsupported("try_release"))
    }

    /// Attempts to acquire `arg` in shared mode.
    ///
    /// A negative result is failure, zero is success with nothing left for
    /// others, positive is success with room for more shared holders.
    fn try_acquire_shared(&self, core: &SyncCore, arg: i32) -> Result<i32, SyncError> {
        let _ = (core, arg);
        Err(unsupported("try_acquire_shared"))
    }

    /// Releases `arg` in shared mode. Returns `true` if a waiter may now
    /// succeed.
    fn try_release_shared(&self, core: &SyncCore, arg: i32) -> Result<bool, SyncError> {
        let _ = (core, arg);
        Err(unsupported("try_release_shared"))
    }

    /// Returns `true` if the calling unit holds the synchronizer exclusively.
    fn is_held_exclusively(&self, core: &SyncCore) -> bool {
        core.owner() == Some(Unit::current_id())
    }
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// The shared words a [`SyncPolicy`] works on.
pub struct SyncCore {
    state: AtomicState,
    /// Raw [`UnitId`] of the exclusive owner, `0` if none.
    owner: AtomicU64,
    queue: WaitQueue,
}

impl SyncCore {
    fn new(initial: i32) -> Self {
        Self {
            state: AtomicState::new(initial),
            owner: AtomicU64::new(0),
            queue: WaitQueue::new(),
        }
    }

    /// The state word.
    pub fn state(&self) -> &AtomicState {
        &self.state
    }

    /// The wait queue.
    pub fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    /// Returns the exclusive owner, if any.
    pub fn owner(&self) -> Option<UnitId> {
        UnitId::from_raw(self.owner.load(Ordering::SeqCst))
    }

    /// Records the exclusive owner. `None` clears it.
    pub fn set_owner(&self, owner: Option<UnitId>) {
        self.owner
            .store(owner.map_or(0, UnitId::as_u64), Ordering::SeqCst);
    }

    /// Returns `true` if some other unit has been queued longer than the
    /// caller. Fair policies refuse to acquire when this holds.
    pub fn has_queued_predecessors(&self) -> bool {
        self.queue.has_predecessor_of(Unit::current_id())
    }
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

/// A queued synchronizer parameterized by its state-transition policy.
pub struct Synchronizer<P> {
    core: SyncCore,
    policy: P,
}

/// Outcome of one pass over the policy inside the acquire loop.
fn unsupported(operation: &str) -> SyncError {
    log::warn!("synchronizer: policy does not implement {operation}");
    SyncError::IllegalState(StateViolation::UnsupportedMode)
}

fn try_once<P: SyncPolicy>(
    policy: &P,
    core: &SyncCore,
    mode: NodeMode,
    arg: i32,
) -> Result<bool, SyncError> {
    match mode {
        NodeMode::Exclusive => policy.try_acquire(core, arg),
        NodeMode::Shared => Ok(policy.try_acquire_shared(core, arg)? >= 0),
    }
}

/// Converts a relative timeout into a deadline. `None` means the timeout is
/// too large to represent and the wait is effectively untimed.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

impl<P: SyncPolicy> Synchronizer<P> {
    /// Creates a synchronizer with the given policy and initial state.
    pub fn new(policy: P, initial: i32) -> Self {
        Self {
            core: SyncCore::new(initial),
            policy,
        }
    }

    /// The state, owner, and queue words.
    pub fn core(&self) -> &SyncCore {
        &self.core
    }

    /// The state-transition policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Reads the state word.
    pub fn state(&self) -> i32 {
        self.core.state.get()
    }

    // -----------------------------------------------------------------------
    // Exclusive mode
    // -----------------------------------------------------------------------

    /// Acquires in exclusive mode, ignoring interrupts.
    ///
    /// An interrupt that arrives while waiting stays set on the unit.
    pub fn acquire(&self, arg: i32) -> Result<(), SyncError> {
        if !self.policy.try_acquire(&self.core, arg)? {
            self.acquire_queued(None, arg, NodeMode::Exclusive, false, None)?;
        }
        Ok(())
    }

    /// Acquires in exclusive mode, aborting with
    /// [`SyncError::Interrupted`] if the unit is interrupted.
    pub fn acquire_interruptibly(&self, arg: i32) -> Result<(), SyncError> {
        if Unit::take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if !self.policy.try_acquire(&self.core, arg)? {
            self.acquire_queued(None, arg, NodeMode::Exclusive, true, None)?;
        }
        Ok(())
    }

    /// Acquires in exclusive mode, giving up after `timeout`.
    ///
    /// Returns `Ok(false)` on timeout. Interruptible.
    pub fn try_acquire_for(&self, arg: i32, timeout: Duration) -> Result<bool, SyncError> {
        if Unit::take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire(&self.core, arg)? {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.acquire_queued(
            None,
            arg,
            NodeMode::Exclusive,
            true,
            deadline_after(timeout),
        )
    }

    /// Releases in exclusive mode. Wakes the first queued unit once the
    /// policy reports a full release.
    pub fn release(&self, arg: i32) -> Result<bool, SyncError> {
        stress_delay();
        if self.policy.try_release(&self.core, arg)? {
            self.core.queue.signal_next();
            return Ok(true);
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Shared mode
    // -----------------------------------------------------------------------

    /// Acquires in shared mode, ignoring interrupts.
    pub fn acquire_shared(&self, arg: i32) -> Result<(), SyncError> {
        if self.policy.try_acquire_shared(&self.core, arg)? < 0 {
            self.acquire_queued(None, arg, NodeMode::Shared, false, None)?;
        }
        Ok(())
    }

    /// Acquires in shared mode, aborting on interrupt.
    pub fn acquire_shared_interruptibly(&self, arg: i32) -> Result<(), SyncError> {
        if Unit::take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire_shared(&self.core, arg)? < 0 {
            self.acquire_queued(None, arg, NodeMode::Shared, true, None)?;
        }
        Ok(())
    }

    /// Acquires in shared mode, giving up after `timeout`. Interruptible.
    pub fn try_acquire_shared_for(&self, arg: i32, timeout: Duration) -> Result<bool, SyncError> {
        if Unit::take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.policy.try_acquire_shared(&self.core, arg)? >= 0 {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.acquire_queued(None, arg, NodeMode::Shared, true, deadline_after(timeout))
    }

    /// Releases in shared mode.
    pub fn release_shared(&self, arg: i32) -> Result<bool, SyncError> {
        stress_delay();
        if self.policy.try_release_shared(&self.core, arg)? {
            self.core.queue.signal_next();
            return Ok(true);
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Acquire loop
    // -----------------------------------------------------------------------

    /// The slow path shared by every acquire variant.
    ///
    /// `node` is `Some` when re-acquiring after a condition wait. Returns
    /// `Ok(false)` only when `deadline` passes; errors cancel the node.
    pub(crate) fn acquire_queued(
        &self,
        mut node: Option<Arc<WaitNode>>,
        arg: i32,
        mode: NodeMode,
        interruptible: bool,
        deadline: Option<Instant>,
    ) -> Result<bool, SyncError> {
        let queue = &self.core.queue;
        loop {
            let may_try = match &node {
                Some(n) if n.is_queued() => queue.is_first(n),
                _ => true,
            };
            if may_try {
                stress_delay();
                match try_once(&self.policy, &self.core, mode, arg) {
                    Ok(true) => {
                        if let Some(n) = &node {
                            if n.is_queued() {
                                queue.promote(n);
                                if mode == NodeMode::Shared {
                                    queue.signal_next_if_shared();
                                }
                            }
                        }
                        return Ok(true);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        if let Some(n) = &node {
                            queue.cancel(n);
                        }
                        log::warn!("synchronizer: policy failed while queued: {e}");
                        return Err(e);
                    }
                }
            }

            let Some(n) = &node else {
                node = Some(WaitNode::new(mode));
                continue;
            };

            if !n.is_queued() {
                queue.enqueue(Arc::clone(n));
            } else if n.status().is_empty() {
                n.set_flags(NodeStatus::WAITING);
            } else {
                match deadline {
                    None => {
                        log::trace!("synchronizer: unit {} parking", n.unit_id());
                        Unit::park();
                    }
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            queue.cancel(n);
                            log::debug!("synchronizer: unit {} timed out", n.unit_id());
                            return Ok(false);
                        }
                        if remaining > SPIN_FOR_TIMEOUT_THRESHOLD {
                            Unit::park_timeout(remaining);
                        } else {
                            loom_compat::yield_now();
                        }
                    }
                }
                n.clear_status();
                if interruptible && Unit::take_interrupt() {
                    queue.cancel(n);
                    return Err(SyncError::Interrupted);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queue inspection
    // -----------------------------------------------------------------------

    /// Returns `true` if any unit is waiting to acquire.
    pub fn has_queued_threads(&self) -> bool {
        self.core.queue.has_queued_threads()
    }

    /// Returns `true` if any acquire has ever had to queue.
    pub fn has_contended(&self) -> bool {
        self.core.queue.has_contended()
    }

    /// Returns an estimate of the number of waiting units.
    pub fn queue_length(&self) -> usize {
        self.core.queue.len()
    }

    /// Returns the longest-waiting unit, if any.
    pub fn first_queued_unit(&self) -> Option<UnitId> {
        self.core.queue.first_unit()
    }

    /// Returns `true` if `unit` is waiting to acquire.
    pub fn is_queued(&self, unit: UnitId) -> bool {
        self.core.queue.contains_unit(unit)
    }

    /// Returns the waiting units, longest-waiting first.
    pub fn queued_units(&self) -> Vec<UnitId> {
        self.core.queue.units(None)
    }

    /// Returns the units waiting in exclusive mode.
    pub fn exclusive_queued_units(&self) -> Vec<UnitId> {
        self.core.queue.units(Some(NodeMode::Exclusive))
    }

    /// Returns the units waiting in shared mode.
    pub fn shared_queued_units(&self) -> Vec<UnitId> {
        self.core.queue.units(Some(NodeMode::Shared))
    }

    /// Returns `true` if another unit has been waiting longer than the caller.
    pub fn has_queued_predecessors(&self) -> bool {
        self.core.has_queued_predecessors()
    }

    /// Returns `true` if the calling unit holds this synchronizer exclusively.
    pub fn is_held_exclusively(&self) -> bool {
        self.policy.is_held_exclusively(&self.core)
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    /// Creates a condition bound to this synchronizer.
    pub fn new_condition(self: &Arc<Self>) -> Condition {
        let host: Arc<dyn ConditionHost> = Arc::clone(self) as Arc<dyn ConditionHost>;
        Condition::new(host)
    }

    /// Returns `true` if `condition` was created by this synchronizer.
    pub fn owns(&self, condition: &Condition) -> bool {
        core::ptr::addr_eq(condition.host_ptr(), core::ptr::from_ref(self))
    }

    fn check_condition(&self, condition: &Condition) -> Result<(), SyncError> {
        if !self.owns(condition) {
            return Err(SyncError::IllegalArgument(
                ArgumentViolation::ForeignCondition,
            ));
        }
        if !self.is_held_exclusively() {
            log::warn!(
                "synchronizer: condition inspected by unit {} without holding the lock",
                Unit::current_id()
            );
            return Err(SyncError::IllegalState(StateViolation::NotHeld));
        }
        Ok(())
    }

    /// Returns `true` if any unit is waiting on `condition`.
    ///
    /// The caller must hold this synchronizer exclusively.
    pub fn has_waiters(&self, condition: &Condition) -> Result<bool, SyncError> {
        self.check_condition(condition)?;
        Ok(condition.waiter_count() > 0)
    }

    /// Returns an estimate of the number of units waiting on `condition`.
    pub fn wait_queue_length(&self, condition: &Condition) -> Result<usize, SyncError> {
        self.check_condition(condition)?;
        Ok(condition.waiter_count())
    }

    /// Returns the units waiting on `condition`, longest-waiting first.
    pub fn waiting_units(&self, condition: &Condition) -> Result<Vec<UnitId>, SyncError> {
        self.check_condition(condition)?;
        Ok(condition.waiter_ids())
    }
}

impl<P: fmt::Debug> fmt::Debug for Synchronizer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.core.state.get())
            .field("owner", &self.core.owner())
            .field("queue", &self.core.queue)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<P> fmt::Display for Synchronizer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[State = {}, {}empty queue]",
            self.core.state.get(),
            if self.core.queue.has_queued_threads() {
                "non"
            } else {
                ""
            }
        )
    }
}

// ---------------------------------------------------------------------------
// Condition support
// ---------------------------------------------------------------------------

/// What a [`Condition`] needs from the synchronizer that created it.
pub(crate) trait ConditionHost: Send + Sync {
    fn core(&self) -> &SyncCore;

    fn is_held_exclusively(&self) -> bool;

    /// Releases the full hold, returning the state to restore later.
    fn fully_release(&self) -> Result<i32, SyncError>;

    /// Re-acquires `saved` using `node`, ignoring interrupts.
    fn reacquire(&self, node: Arc<WaitNode>, saved: i32) -> Result<(), SyncError>;
}

impl<P: SyncPolicy> ConditionHost for Synchronizer<P> {
    fn core(&self) -> &SyncCore {
        &self.core
    }

    fn is_held_exclusively(&self) -> bool {
        self.policy.is_held_exclusively(&self.core)
    }

    fn fully_release(&self) -> Result<i32, SyncError> {
        let saved = self.core.state.get();
        if self.release(saved)? {
            Ok(saved)
        } else {
            log::warn!("synchronizer: condition wait could not fully release");
            Err(SyncError::IllegalState(StateViolation::NotHeld))
        }
    }

    fn reacquire(&self, node: Arc<WaitNode>, saved: i32) -> Result<(), SyncError> {
        self.acquire_queued(Some(node), saved, NodeMode::Exclusive, false, None)?;
        Ok(())
    }
}
