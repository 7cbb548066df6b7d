//! Queued-synchronizer concurrency core.
//!
//! This crate contains a generic blocking-synchronization engine
//! ([`Synchronizer`](sync::Synchronizer)) built from a single atomic state
//! word and a FIFO queue of parked waiters, together with the primitives
//! layered on top of it: a reentrant exclusive lock with condition objects,
//! and a counting semaphore. A monitor-style bounded blocking queue is
//! provided alongside as the simpler mutex-plus-condvar alternative.
//!
//! Execution units are OS threads, identified by [`UnitId`]. Every primitive
//! can be exercised under loom's deterministic scheduler by building with
//! `--cfg loom`.

pub mod error;
pub mod sync;
pub mod unit;

pub use error::SyncError;
pub use unit::{Unit, UnitId};
