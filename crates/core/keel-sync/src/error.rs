//! Error types shared by every synchronizer.
//!
//! Timeouts are not errors: timed operations report them through their
//! return value (`Ok(false)`, `None`, or the rejected item).

use core::fmt;

/// Errors surfaced by acquire, release, and condition operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// The operation is not valid in the synchronizer's current state.
    IllegalState(StateViolation),
    /// An argument was out of range.
    IllegalArgument(ArgumentViolation),
    /// A hold or permit count would leave the representable range.
    Overflow(OverflowKind),
    /// The calling unit was interrupted while waiting. Its queue node has
    /// already been cancelled when this is returned.
    Interrupted,
}

/// The specific rule behind a [`SyncError::IllegalState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateViolation {
    /// Release attempted by a unit that does not own the lock.
    NotOwner,
    /// Condition operation attempted without holding the owning lock.
    NotHeld,
    /// The synchronizer does not implement the requested acquisition mode.
    UnsupportedMode,
    /// A non-blocking insert found the queue at capacity.
    QueueFull,
}

/// The specific rule behind a [`SyncError::IllegalArgument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentViolation {
    /// A permit count was negative.
    NegativePermits,
    /// A queue was created with zero capacity.
    ZeroCapacity,
    /// A condition was used with a synchronizer that did not create it.
    ForeignCondition,
}

/// Which count overflowed in a [`SyncError::Overflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowKind {
    /// Reentrant hold count exceeded `i32::MAX`.
    HoldCount,
    /// Permit count exceeded `i32::MAX`.
    PermitCount,
    /// Permit count dropped below `i32::MIN`.
    PermitUnderflow,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalState(v) => write!(f, "illegal state: {v}"),
            Self::IllegalArgument(v) => write!(f, "illegal argument: {v}"),
            Self::Overflow(k) => write!(f, "overflow: {k}"),
            Self::Interrupted => f.write_str("interrupted while waiting"),
        }
    }
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOwner => f.write_str("calling unit does not own the lock"),
            Self::NotHeld => f.write_str("lock not held by the calling unit"),
            Self::UnsupportedMode => f.write_str("acquisition mode not supported"),
            Self::QueueFull => f.write_str("queue full"),
        }
    }
}

impl fmt::Display for ArgumentViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativePermits => f.write_str("permit count must not be negative"),
            Self::ZeroCapacity => f.write_str("capacity must be positive"),
            Self::ForeignCondition => {
                f.write_str("condition belongs to a different synchronizer")
            }
        }
    }
}

impl fmt::Display for OverflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HoldCount => f.write_str("maximum lock count exceeded"),
            Self::PermitCount => f.write_str("maximum permit count exceeded"),
            Self::PermitUnderflow => f.write_str("permit count underflow"),
        }
    }
}

impl std::error::Error for SyncError {}
