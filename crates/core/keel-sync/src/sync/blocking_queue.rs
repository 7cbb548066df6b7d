//! Bounded blocking FIFO queue.
//!
//! The monitor-style counterpart to the queued synchronizers: one coarse
//! mutex guards a fixed ring buffer, and two condition variables park
//! producers while the ring is full and consumers while it is empty.
//! `put` and `take` ignore interrupts. Their `_interruptibly` variants wait
//! in slices of [`INTERRUPT_POLL`] and give up once the unit is interrupted.

use core::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{ArgumentViolation, StateViolation, SyncError};
use crate::unit::Unit;

/// Longest an interruptible wait sleeps before re-checking the unit's
/// interrupt flag. Condition variables do not observe `Unit::interrupt`.
pub const INTERRUPT_POLL: Duration = Duration::from_millis(10);

/// Fixed-capacity circular buffer. Not synchronized.
struct Ring<T> {
    items: Box<[Option<T>]>,
    /// Next slot to take from.
    head: usize,
    /// Next slot to put into.
    tail: usize,
    count: usize,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.items.len()
    }

    fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Caller checks `!is_full()`.
    fn push(&mut self, item: T) {
        self.items[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.items[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        item
    }

    fn front(&self) -> Option<&T> {
        if self.count == 0 {
            None
        } else {
            self.items[self.head].as_ref()
        }
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.count)
            .filter_map(move |i| self.items[(self.head + i) % self.capacity()].as_ref())
    }
}

/// A bounded FIFO queue whose inserts block while full and whose removals
/// block while empty.
pub struct BoundedBlockingQueue<T> {
    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedBlockingQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, SyncError> {
        if capacity == 0 {
            return Err(SyncError::IllegalArgument(ArgumentViolation::ZeroCapacity));
        }
        Ok(Self {
            ring: Mutex::new(Ring::new(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    fn enqueue(&self, ring: &mut MutexGuard<'_, Ring<T>>, item: T) {
        ring.push(item);
        self.not_empty.notify_one();
    }

    fn dequeue(&self, ring: &mut MutexGuard<'_, Ring<T>>) -> Option<T> {
        let item = ring.pop()?;
        self.not_full.notify_one();
        Some(item)
    }

    /// Inserts `item`, waiting for space if the queue is full.
    pub fn put(&self, item: T) {
        let mut ring = self.ring.lock();
        while ring.is_full() {
            self.not_full.wait(&mut ring);
        }
        self.enqueue(&mut ring, item);
    }

    /// Inserts `item`, waiting for space until the unit is interrupted.
    ///
    /// On [`SyncError::Interrupted`] the item is dropped and the interrupt
    /// flag is cleared.
    pub fn put_interruptibly(&self, item: T) -> Result<(), SyncError> {
        let mut ring = self.ring.lock();
        loop {
            if Unit::take_interrupt() {
                log::debug!("blocking queue: put by unit {} interrupted", Unit::current_id());
                return Err(SyncError::Interrupted);
            }
            if !ring.is_full() {
                self.enqueue(&mut ring, item);
                return Ok(());
            }
            self.not_full.wait_for(&mut ring, INTERRUPT_POLL);
        }
    }

    /// Inserts `item` if there is space right now; otherwise hands it back.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            return Err(item);
        }
        self.enqueue(&mut ring, item);
        Ok(())
    }

    /// Inserts `item`, waiting at most `timeout` for space. Hands the item
    /// back on timeout.
    pub fn offer_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.ring.lock();
        while ring.is_full() {
            match deadline {
                Some(deadline) => {
                    let timed_out = self.not_full.wait_until(&mut ring, deadline).timed_out();
                    if timed_out && ring.is_full() {
                        return Err(item);
                    }
                }
                None => self.not_full.wait(&mut ring),
            }
        }
        self.enqueue(&mut ring, item);
        Ok(())
    }

    /// Inserts `item` if there is space right now.
    ///
    /// A full queue is [`StateViolation::QueueFull`] and `item` is dropped.
    pub fn add(&self, item: T) -> Result<(), SyncError> {
        self.offer(item).map_err(|_| {
            log::warn!("blocking queue: add to a full queue");
            SyncError::IllegalState(StateViolation::QueueFull)
        })
    }

    /// Removes the head item, waiting for one if the queue is empty.
    pub fn take(&self) -> T {
        let mut ring = self.ring.lock();
        loop {
            if let Some(item) = self.dequeue(&mut ring) {
                return item;
            }
            self.not_empty.wait(&mut ring);
        }
    }

    /// Removes the head item, waiting for one until the unit is interrupted.
    ///
    /// The interrupt flag is cleared on [`SyncError::Interrupted`].
    pub fn take_interruptibly(&self) -> Result<T, SyncError> {
        let mut ring = self.ring.lock();
        loop {
            if Unit::take_interrupt() {
                log::debug!("blocking queue: take by unit {} interrupted", Unit::current_id());
                return Err(SyncError::Interrupted);
            }
            if let Some(item) = self.dequeue(&mut ring) {
                return Ok(item);
            }
            self.not_empty.wait_for(&mut ring, INTERRUPT_POLL);
        }
    }

    /// Removes the head item if there is one.
    pub fn poll(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        self.dequeue(&mut ring)
    }

    /// Removes the head item, waiting at most `timeout` for one.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.ring.lock();
        loop {
            if let Some(item) = self.dequeue(&mut ring) {
                return Some(item);
            }
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut ring, deadline).timed_out() {
                        return self.dequeue(&mut ring);
                    }
                }
                None => self.not_empty.wait(&mut ring),
            }
        }
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    /// Returns `true` if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.ring.lock().is_full()
    }

    /// Returns the fixed capacity.
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /// Returns how many more items fit without blocking.
    pub fn remaining_capacity(&self) -> usize {
        let ring = self.ring.lock();
        ring.capacity() - ring.count
    }

    /// Removes every item, waking all blocked producers.
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        while ring.pop().is_some() {}
        self.not_full.notify_all();
    }

    /// Moves every item into `out` in FIFO order. Returns how many moved.
    pub fn drain_to(&self, out: &mut Vec<T>) -> usize {
        let mut ring = self.ring.lock();
        let n = ring.count;
        out.reserve(n);
        while let Some(item) = ring.pop() {
            out.push(item);
        }
        if n > 0 {
            self.not_full.notify_all();
        }
        n
    }
}

impl<T: Clone> BoundedBlockingQueue<T> {
    /// Returns a copy of the head item without removing it.
    pub fn peek(&self) -> Option<T> {
        self.ring.lock().front().cloned()
    }
}

impl<T: PartialEq> BoundedBlockingQueue<T> {
    /// Returns `true` if an item equal to `item` is queued.
    pub fn contains(&self, item: &T) -> bool {
        self.ring.lock().iter().any(|x| x == item)
    }
}

impl<T: fmt::Debug> fmt::Debug for BoundedBlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("BoundedBlockingQueue")
            .field("capacity", &ring.capacity())
            .field("items", &ring.iter().collect::<Vec<_>>())
            .finish()
    }
}
