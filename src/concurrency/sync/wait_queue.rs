//! Spinlock-protected queue of suspended semaphore waiters.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;

use crossbeam_utils::Backoff;

/// A suspended task waiting for `threshold` permits.
struct Waiter {
    id: u64,
    threshold: usize,
    waker: Waker,
}

/// A FIFO queue of suspended tasks.
///
/// Uses a simple spinlock to protect the queue operations.
/// Critical sections only push, scan or pop entries, so contention is minimal.
pub struct WaitQueue {
    waiters: UnsafeCell<VecDeque<Waiter>>,
    next_id: UnsafeCell<u64>,
    lock: AtomicBool,
}

// Safety: all access to the cells goes through `WaitQueueGuard`, which holds the spinlock.
unsafe impl Sync for WaitQueue {}
unsafe impl Send for WaitQueue {}

impl WaitQueue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            waiters: UnsafeCell::new(VecDeque::new()),
            next_id: UnsafeCell::new(0),
            lock: AtomicBool::new(false),
        }
    }

    /// Acquires the queue lock.
    pub fn lock(&self) -> WaitQueueGuard<'_> {
        let backoff = Backoff::new();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
        WaitQueueGuard { queue: self }
    }

    /// Number of registered waiters.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Checks if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to a locked [`WaitQueue`]. Unlocks on drop.
pub struct WaitQueueGuard<'a> {
    queue: &'a WaitQueue,
}

impl WaitQueueGuard<'_> {
    #[inline]
    fn waiters(&mut self) -> &mut VecDeque<Waiter> {
        // Safety: the guard holds the spinlock.
        unsafe { &mut *self.queue.waiters.get() }
    }

    /// Registers (or refreshes) a waiter and returns its id.
    ///
    /// Passing the id from a previous registration updates that entry's waker in place.
    /// If the entry was already released by [`take_satisfied`](Self::take_satisfied),
    /// it is queued again under the same id.
    pub fn register(&mut self, id: Option<u64>, threshold: usize, waker: &Waker) -> u64 {
        let id = match id {
            Some(id) => id,
            None => {
                // Safety: the guard holds the spinlock.
                let next = unsafe { &mut *self.queue.next_id.get() };
                let id = *next;
                *next = next.wrapping_add(1);
                id
            }
        };

        let waiters = self.waiters();
        if let Some(existing) = waiters.iter_mut().find(|w| w.id == id) {
            if !existing.waker.will_wake(waker) {
                existing.waker = waker.clone();
            }
            existing.threshold = threshold;
        } else {
            waiters.push_back(Waiter {
                id,
                threshold,
                waker: waker.clone(),
            });
        }
        id
    }

    /// Removes the waiter registered under `id`, if still queued.
    pub fn remove(&mut self, id: u64) {
        self.waiters().retain(|w| w.id != id);
    }

    /// Dequeues every waiter whose threshold is at most `available` and returns their wakers.
    ///
    /// Wakers are returned rather than woken so the caller can drop the lock first.
    pub fn take_satisfied(&mut self, available: usize) -> Vec<Waker> {
        let waiters = self.waiters();
        let mut woken = Vec::new();
        let mut i = 0;
        while i < waiters.len() {
            if waiters[i].threshold <= available {
                if let Some(w) = waiters.remove(i) {
                    woken.push(w.waker);
                }
            } else {
                i += 1;
            }
        }
        woken
    }

    /// Number of registered waiters.
    pub fn len(&self) -> usize {
        // Safety: the guard holds the spinlock.
        unsafe { (*self.queue.waiters.get()).len() }
    }
}

impl Drop for WaitQueueGuard<'_> {
    fn drop(&mut self) {
        self.queue.lock.store(false, Ordering::Release);
    }
}
