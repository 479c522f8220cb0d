//! Task-aware synchronization primitives.

pub mod semaphore;
pub mod wait_queue;

pub use semaphore::{CountingSemaphore, Wait};
pub use wait_queue::WaitQueue;
