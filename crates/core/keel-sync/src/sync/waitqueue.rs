//! FIFO queue of blocked execution units.
//!
//! [`WaitQueue`] orders the [`WaitNode`]s of units that failed to acquire a
//! synchronizer. The front of the queue is a sentinel: either the dummy node
//! created on first use, or the slot of the node that most recently
//! acquired. Its successor is the longest-waiting live node.
//!
//! ## Design
//!
//! - **Links**: `prev`/`next`/`head`/`tail` live in an index arena guarded
//!   by a [`SpinLock`]. The lock is held for a handful of link updates and
//!   never across a park, so no operation blocks.
//! - **Status**: every node's status word stays a lock-free atomic. Wakers
//!   clear `WAITING` and unpark outside the lock; parkers set `WAITING` and
//!   re-check the synchronizer before parking.
//! - **Cancellation**: a cancelled node is spliced out of the arena in O(1)
//!   and its slot recycled. If it was first, the wakeup it may have
//!   consumed is passed on to the new first node.

use core::fmt;
use std::sync::Arc;

use super::node::{NIL, NodeMode, NodeStatus, WaitNode};
use super::spinlock::SpinLock;
use crate::unit::{Unit, UnitId};

struct Link {
    /// `None` for the sentinel and for free slots.
    node: Option<Arc<WaitNode>>,
    prev: u32,
    next: u32,
}

struct Links {
    slots: Vec<Link>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
}

impl Links {
    const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn alloc(&mut self, node: Option<Arc<WaitNode>>) -> u32 {
        let link = Link {
            node,
            prev: NIL,
            next: NIL,
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = link;
            idx
        } else {
            // The arena never holds more slots than concurrently queued units.
            let idx = u32::try_from(self.slots.len()).unwrap_or(NIL - 1);
            self.slots.push(link);
            idx
        }
    }

    fn release(&mut self, idx: u32) {
        let link = &mut self.slots[idx as usize];
        if let Some(node) = link.node.take() {
            node.set_slot(NIL);
        }
        link.prev = NIL;
        link.next = NIL;
        self.free.push(idx);
    }

    /// Index of the first real node, or [`NIL`].
    fn first(&self) -> u32 {
        if self.head == NIL {
            NIL
        } else {
            self.slots[self.head as usize].next
        }
    }

    fn node(&self, idx: u32) -> Option<&Arc<WaitNode>> {
        self.slots.get(idx as usize).and_then(|l| l.node.as_ref())
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<WaitNode>> + '_ {
        let mut cur = self.first();
        core::iter::from_fn(move || {
            let node = self.node(cur)?;
            cur = self.slots[cur as usize].next;
            Some(node)
        })
    }

    /// Clears `WAITING` on the first node if it is parked, returning the
    /// unit to unpark once the lock is dropped.
    fn take_first_waiter(&self, shared_only: bool) -> Option<Unit> {
        let node = self.node(self.first())?;
        if shared_only && node.mode() != NodeMode::Shared {
            return None;
        }
        if node.status().is_empty() {
            return None;
        }
        node.unset_flags(NodeStatus::WAITING);
        Some(node.unit().clone())
    }
}

/// A FIFO queue of blocked execution units.
///
/// See the [module documentation](self) for the locking scheme.
pub struct WaitQueue {
    links: SpinLock<Links>,
}

impl WaitQueue {
    /// Creates an empty queue. No sentinel exists until the first enqueue.
    pub fn new() -> Self {
        Self {
            links: SpinLock::new(Links::new()),
        }
    }

    /// Appends `node` at the tail, creating the sentinel head on first use.
    ///
    /// Does nothing if the node is already queued.
    pub fn enqueue(&self, node: Arc<WaitNode>) {
        let mut links = self.links.lock();
        if node.is_queued() {
            return;
        }
        if links.head == NIL {
            let sentinel = links.alloc(None);
            links.head = sentinel;
            links.tail = sentinel;
        }
        let unit = node.unit_id();
        let tail = links.tail;
        let idx = links.alloc(Some(Arc::clone(&node)));
        links.slots[idx as usize].prev = tail;
        links.slots[tail as usize].next = idx;
        links.tail = idx;
        node.set_slot(idx);
        drop(links);
        log::trace!("waitqueue: unit {unit} enqueued");
    }

    /// Returns `true` if `node` is the longest-waiting live node.
    pub fn is_first(&self, node: &WaitNode) -> bool {
        let links = self.links.lock();
        let slot = node.slot();
        slot != NIL && links.first() == slot
    }

    /// Makes `node`, which must be first, the new sentinel head.
    ///
    /// Called by the node's own unit after it acquired. The old sentinel's
    /// slot is recycled and `node` is no longer queued afterwards.
    pub fn promote(&self, node: &WaitNode) {
        let mut links = self.links.lock();
        let slot = node.slot();
        if slot == NIL || links.first() != slot {
            return;
        }
        let old_head = links.head;
        links.head = slot;
        let link = &mut links.slots[slot as usize];
        link.prev = NIL;
        link.node = None;
        node.set_slot(NIL);
        links.release(old_head);
    }

    /// Marks `node` cancelled and splices it out.
    ///
    /// If `node` was first, the next live node is woken so that a wakeup
    /// aimed at the cancelled unit is not lost.
    pub fn cancel(&self, node: &WaitNode) {
        let mut links = self.links.lock();
        node.mark_cancelled();
        let slot = node.slot();
        if slot == NIL {
            return;
        }
        let was_first = links.first() == slot;
        let (prev, next) = {
            let link = &links.slots[slot as usize];
            (link.prev, link.next)
        };
        links.slots[prev as usize].next = next;
        if next == NIL {
            links.tail = prev;
        } else {
            links.slots[next as usize].prev = prev;
        }
        links.release(slot);
        let successor = if was_first {
            links.take_first_waiter(false)
        } else {
            None
        };
        drop(links);

        log::debug!(
            "waitqueue: unit {} cancelled{}",
            node.unit_id(),
            if was_first { " at head" } else { "" }
        );
        if let Some(unit) = successor {
            unit.unpark();
        }
    }

    /// Wakes the first queued unit if it is parked.
    ///
    /// Called after a release that may allow it to acquire. A first node
    /// that has not yet published `WAITING` is left alone: it re-checks the
    /// synchronizer before parking.
    pub fn signal_next(&self) {
        let waiter = self.links.lock().take_first_waiter(false);
        if let Some(unit) = waiter {
            log::trace!("waitqueue: waking unit {}", unit.id());
            unit.unpark();
        }
    }

    /// Like [`signal_next`](Self::signal_next), but only wakes a shared-mode
    /// node. Used to propagate a shared acquisition down the queue.
    pub fn signal_next_if_shared(&self) {
        let waiter = self.links.lock().take_first_waiter(true);
        if let Some(unit) = waiter {
            log::trace!("waitqueue: propagating to unit {}", unit.id());
            unit.unpark();
        }
    }

    /// Returns `true` if any unit is queued.
    pub fn has_queued_threads(&self) -> bool {
        self.links.lock().first() != NIL
    }

    /// Returns `true` if any unit has ever had to queue.
    pub fn has_contended(&self) -> bool {
        self.links.lock().head != NIL
    }

    /// Returns the number of queued units.
    pub fn len(&self) -> usize {
        self.links.lock().iter().count()
    }

    /// Returns `true` if no unit is queued.
    pub fn is_empty(&self) -> bool {
        !self.has_queued_threads()
    }

    /// Returns the longest-waiting unit, if any.
    pub fn first_unit(&self) -> Option<UnitId> {
        let links = self.links.lock();
        links.node(links.first()).map(|n| n.unit_id())
    }

    /// Returns `true` if `unit` is queued.
    pub fn contains_unit(&self, unit: UnitId) -> bool {
        self.links.lock().iter().any(|n| n.unit_id() == unit)
    }

    /// Returns the queued units, longest-waiting first, optionally
    /// restricted to one mode.
    pub fn units(&self, mode: Option<NodeMode>) -> Vec<UnitId> {
        self.links
            .lock()
            .iter()
            .filter(|n| mode.is_none_or(|m| n.mode() == m))
            .map(|n| n.unit_id())
            .collect()
    }

    /// Returns `true` if some unit other than `unit` is first in line.
    pub fn has_predecessor_of(&self, unit: UnitId) -> bool {
        self.first_unit().is_some_and(|first| first != unit)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("units", &self.units(None))
            .finish()
    }
}
