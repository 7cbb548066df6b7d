//! Execution units.
//!
//! An execution unit is the thing that acquires, waits on, and releases a
//! synchronizer: one OS thread. Each unit is lazily registered the first
//! time it touches this crate and receives a process-unique [`UnitId`].
//!
//! Units also carry an interrupt flag. Interrupting a unit sets the flag and
//! unparks it; interruptible waits observe the flag, clear it, and return
//! [`SyncError::Interrupted`](crate::SyncError::Interrupted).

use core::fmt;
use core::num::NonZeroU64;
use core::time::Duration;
use std::sync::Arc;

use crate::sync::loom_compat::{self, AtomicBool, Ordering, Thread};

/// Source of unit identifiers. Zero is never handed out.
static NEXT_UNIT_ID: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);

/// Opaque identifier of an execution unit, compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct UnitId(NonZeroU64);

impl UnitId {
    /// Returns the raw `u64` value. Never zero.
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }

    /// Rebuilds an id from its raw value. `0` means "no unit".
    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    fn allocate() -> Self {
        let raw = NEXT_UNIT_ID.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        // The counter would need 2^64 thread registrations to wrap.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct UnitInner {
    id: UnitId,
    thread: Thread,
    interrupted: AtomicBool,
}

/// Handle to an execution unit.
///
/// Cheap to clone; clones refer to the same unit. A handle may be sent to
/// other threads so they can [`unpark`](Unit::unpark) or
/// [`interrupt`](Unit::interrupt) it.
#[derive(Clone)]
pub struct Unit {
    inner: Arc<UnitInner>,
}

loom_compat::thread_local! {
    static CURRENT: Unit = Unit::register();
}

impl Unit {
    fn register() -> Self {
        Self {
            inner: Arc::new(UnitInner {
                id: UnitId::allocate(),
                thread: loom_compat::current(),
                interrupted: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a handle to the calling unit.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    /// Returns the calling unit's id.
    pub fn current_id() -> UnitId {
        CURRENT.with(Unit::id)
    }

    /// Returns this unit's id.
    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    /// Blocks the calling unit until it is unparked.
    ///
    /// May return spuriously; callers re-check their wait condition.
    pub fn park() {
        loom_compat::park();
    }

    /// Blocks the calling unit until it is unparked or `dur` elapses.
    pub fn park_timeout(dur: Duration) {
        loom_compat::park_timeout(dur);
    }

    /// Makes this unit's current or next park return.
    pub fn unpark(&self) {
        self.inner.thread.unpark();
    }

    /// Sets this unit's interrupt flag and unparks it.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        self.unpark();
    }

    /// Returns `true` if this unit's interrupt flag is set.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Reads and clears the calling unit's interrupt flag.
    pub fn take_interrupt() -> bool {
        CURRENT.with(|unit| unit.inner.interrupted.swap(false, Ordering::SeqCst))
    }

    /// Sets the calling unit's interrupt flag without unparking it.
    ///
    /// Used when an interrupt arrived too late to abort a wait and must stay
    /// visible to the caller.
    pub(crate) fn reassert_interrupt() {
        CURRENT.with(|unit| unit.inner.interrupted.store(true, Ordering::SeqCst));
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Unit {}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
