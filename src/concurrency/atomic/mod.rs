//! Atomic slots for the cell's shared state.
//!
//! The cell's `current`, `backup` and evaluator slots are read and written from
//! tasks that may run on any worker thread, so they live in atomics rather than
//! behind a lock.

/// Atomic [`GlobalRef`](crate::naming::GlobalRef) slot.
pub mod global_ref;

pub use global_ref::AtomicGlobalRef;
