//! Counting semaphore whose waits suspend the calling task.
//!
//! This is the only synchronization primitive the stencil protocol uses. It is
//! a local control object: `wait(n)` parks the calling task until `n` permits
//! can be taken at once, `signal(n)` returns permits and wakes every waiter
//! whose threshold can now be met.
//!
//! # Lost wakeups
//!
//! A waiter registers itself under the queue lock and then re-checks the
//! counter before suspending. `signal` bumps the counter first and only then
//! scans the queue under the same lock, so a permit released between the
//! waiter's first check and its registration is always observed by one side.

use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::task::{Context, Poll};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use tracing::trace;

use super::wait_queue::WaitQueue;
use crate::threads::{block_on, block_on_timeout, WaitOutcome};

/// A counting semaphore for cooperative tasks.
///
/// The count never goes negative: `wait(n)` takes `n` permits in a single
/// atomic step, or not at all.
pub struct CountingSemaphore {
    count: CachePadded<AtomicUsize>,
    queue: WaitQueue,
}

impl CountingSemaphore {
    /// Creates a semaphore holding `initial` permits.
    pub const fn new(initial: usize) -> Self {
        Self {
            count: CachePadded::new(AtomicUsize::new(initial)),
            queue: WaitQueue::new(),
        }
    }

    /// Returns the number of permits currently available.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns the number of suspended waiters.
    pub fn waiters(&self) -> usize {
        self.queue.len()
    }

    /// Takes `n` permits if they are available right now.
    ///
    /// # Panics
    /// Panics if `n == 0`.
    pub fn try_wait(&self, n: usize) -> bool {
        assert!(n > 0, "cannot wait for zero permits");
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(n))
            .is_ok()
    }

    /// Suspends the calling task until `n` permits can be taken, then takes them.
    ///
    /// # Panics
    /// Panics if `n == 0`.
    pub fn wait(&self, n: usize) -> Wait<'_> {
        assert!(n > 0, "cannot wait for zero permits");
        Wait {
            semaphore: self,
            n,
            id: None,
        }
    }

    /// Returns `n` permits and wakes every waiter whose threshold is now met. Never blocks.
    pub fn signal(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.count.fetch_add(n, Ordering::AcqRel);

        let wakers = {
            let mut queue = self.queue.lock();
            let available = self.count.load(Ordering::Acquire);
            queue.take_satisfied(available)
        };
        trace!(n, woken = wakers.len(), "semaphore signal");
        for waker in wakers {
            waker.wake();
        }
    }

    /// Blocks the calling OS thread until `n` permits can be taken.
    ///
    /// Meant for threads outside the scheduler; a worker thread should `.await` [`wait`](Self::wait).
    pub fn wait_blocking(&self, n: usize) {
        block_on(self.wait(n));
    }

    /// Like [`wait_blocking`](Self::wait_blocking), but gives up after `timeout`.
    ///
    /// No permits are taken when the wait times out.
    pub fn wait_blocking_timeout(&self, n: usize, timeout: Duration) -> WaitOutcome {
        match block_on_timeout(self.wait(n), timeout) {
            Ok(()) => WaitOutcome::Signaled,
            Err(_) => WaitOutcome::Timeout,
        }
    }
}

impl core::fmt::Debug for CountingSemaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CountingSemaphore")
            .field("count", &self.count())
            .field("waiters", &self.waiters())
            .finish()
    }
}

/// Future returned by [`CountingSemaphore::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'a> {
    semaphore: &'a CountingSemaphore,
    n: usize,
    id: Option<u64>,
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let semaphore = this.semaphore;

        if semaphore.try_wait(this.n) {
            if let Some(id) = this.id.take() {
                semaphore.queue.lock().remove(id);
            }
            return Poll::Ready(());
        }

        let mut queue = semaphore.queue.lock();
        let id = queue.register(this.id, this.n, cx.waker());

        // Double check under the lock: a signal may have landed after the first attempt.
        if semaphore.try_wait(this.n) {
            queue.remove(id);
            this.id = None;
            return Poll::Ready(());
        }
        this.id = Some(id);
        trace!(n = this.n, "semaphore wait suspended");
        Poll::Pending
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.semaphore.queue.lock().remove(id);
        }
    }
}
