//! Concurrency building blocks for the stencil engine.
//!
//! Important: everything in here is shared between tasks that the scheduler
//! may resume on any worker thread. Nothing relies on single-threaded
//! re-entrancy.

pub mod atomic;
pub mod sync;

pub use atomic::AtomicGlobalRef;
pub use sync::CountingSemaphore;
