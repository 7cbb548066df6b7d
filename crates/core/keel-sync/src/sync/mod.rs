//! Blocking synchronization primitives.
//!
//! Provides the generic [`Synchronizer`] engine and the primitives built on
//! it: [`ReentrantLock`] (with [`Condition`] objects) and [`Semaphore`].
//! [`BoundedBlockingQueue`] is the monitor-style alternative, built from a
//! single mutex and two condition variables instead of the engine.

use core::time::Duration;

mod blocking_queue;
mod condition;
mod node;
mod reentrant;
mod semaphore;
mod spinlock;
mod state;
#[cfg(keel_lock_stress)]
pub mod stress;
mod synchronizer;
mod waitqueue;

pub(crate) mod loom_compat;

pub use blocking_queue::{BoundedBlockingQueue, INTERRUPT_POLL};
pub use condition::Condition;
pub use node::{NodeMode, NodeStatus, WaitNode};
pub use reentrant::{ReentrantLock, ReentrantLockGuard, ReentrantSync};
pub use semaphore::{Semaphore, SemaphorePermit, SemaphoreSync};
pub use state::AtomicState;
pub use synchronizer::{SyncCore, SyncPolicy, Synchronizer};
pub use waitqueue::WaitQueue;

/// Timed waits yield instead of parking once the remaining time drops below
/// this threshold.
pub const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_nanos(1000);

/// Admission policy of a lock or semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// Arriving units may acquire ahead of queued ones (barging).
    #[default]
    Unfair,
    /// Queued units are admitted in arrival order.
    Fair,
}

impl Fairness {
    /// Returns `true` for [`Fairness::Fair`].
    pub const fn is_fair(self) -> bool {
        matches!(self, Self::Fair)
    }
}
