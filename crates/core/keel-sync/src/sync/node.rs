//! Wait queue records.
//!
//! A [`WaitNode`] stands for one execution unit that is blocked, or about to
//! block, on a synchronizer. The same record type is used on a condition's
//! wait list; it is transferred into the main queue when signalled.

use core::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use super::loom_compat::{AtomicU32, Ordering};
use crate::unit::{Unit, UnitId};

bitflags! {
    /// Status word of a [`WaitNode`].
    ///
    /// An empty status means the owner is running and will re-check the
    /// synchronizer before it parks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeStatus: u32 {
        /// The owner is parked, or about to park, and must be unparked.
        const WAITING = 1;
        /// The node sits on a condition wait list.
        const COND = 2;
        /// The owner gave up: timeout, interrupt, or error.
        const CANCELLED = 0x8000_0000;
    }
}

/// Acquisition mode of a queued unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// At most one holder.
    Exclusive,
    /// Many holders, gated by a count.
    Shared,
}

/// Marks a node that is not linked into a wait queue.
pub(crate) const NIL: u32 = u32::MAX;

/// One blocked or about-to-block execution unit.
pub struct WaitNode {
    mode: NodeMode,
    status: AtomicU32,
    /// Arena slot in the owning [`WaitQueue`](super::WaitQueue), or [`NIL`].
    /// Written only under the queue's link lock.
    slot: AtomicU32,
    unit: Unit,
}

impl WaitNode {
    /// Creates a node for the calling unit with an empty status.
    pub fn new(mode: NodeMode) -> Arc<Self> {
        Arc::new(Self::with_status(mode, NodeStatus::empty()))
    }

    /// Creates a condition wait node for the calling unit.
    pub(crate) fn condition() -> Arc<Self> {
        Arc::new(Self::with_status(
            NodeMode::Exclusive,
            NodeStatus::COND | NodeStatus::WAITING,
        ))
    }

    fn with_status(mode: NodeMode, status: NodeStatus) -> Self {
        Self {
            mode,
            status: AtomicU32::new(status.bits()),
            slot: AtomicU32::new(NIL),
            unit: Unit::current(),
        }
    }

    /// Returns the acquisition mode.
    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    /// Returns the id of the unit this node belongs to.
    pub fn unit_id(&self) -> UnitId {
        self.unit.id()
    }

    /// Returns the current status.
    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_bits_retain(self.status.load(Ordering::SeqCst))
    }

    /// Sets `flags`, returning the status before the update.
    pub(crate) fn set_flags(&self, flags: NodeStatus) -> NodeStatus {
        NodeStatus::from_bits_retain(self.status.fetch_or(flags.bits(), Ordering::SeqCst))
    }

    /// Clears `flags`, returning the status before the update.
    ///
    /// Whoever observes a flag in the returned value won the race to clear
    /// it.
    pub(crate) fn unset_flags(&self, flags: NodeStatus) -> NodeStatus {
        NodeStatus::from_bits_retain(self.status.fetch_and(!flags.bits(), Ordering::SeqCst))
    }

    pub(crate) fn clear_status(&self) {
        self.status.store(0, Ordering::SeqCst);
    }

    pub(crate) fn mark_cancelled(&self) {
        self.status
            .store(NodeStatus::CANCELLED.bits(), Ordering::SeqCst);
    }

    /// Returns `true` once the owner has abandoned its acquisition.
    pub fn is_cancelled(&self) -> bool {
        self.status().contains(NodeStatus::CANCELLED)
    }

    /// Returns `true` while the node is linked into a wait queue.
    pub fn is_queued(&self) -> bool {
        self.slot() != NIL
    }

    pub(crate) fn slot(&self) -> u32 {
        self.slot.load(Ordering::Acquire)
    }

    pub(crate) fn set_slot(&self, slot: u32) {
        self.slot.store(slot, Ordering::Release);
    }

    pub(crate) fn unit(&self) -> &Unit {
        &self.unit
    }
}

impl fmt::Debug for WaitNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitNode")
            .field("mode", &self.mode)
            .field("status", &self.status())
            .field("unit", &self.unit_id())
            .finish_non_exhaustive()
    }
}
