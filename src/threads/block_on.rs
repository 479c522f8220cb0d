//! Driving a single future to completion on the calling OS thread.
//!
//! This is the bridge for callers outside the scheduler, such as the
//! orchestrator that seeds a cell with `call` and waits for its result.
//! Calling it from a worker thread blocks that worker.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};

use crate::error::Elapsed;

struct ThreadWaker(Unparker);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

fn parker_waker() -> (Parker, Waker) {
    let parker = Parker::new();
    let waker = Waker::from(Arc::new(ThreadWaker(parker.unparker().clone())));
    (parker, waker)
}

/// Polls `future` on the current thread, parking between wakeups.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let (parker, waker) = parker_waker();
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        parker.park();
    }
}

/// Like [`block_on`], but drops the future and returns [`Elapsed`] once `timeout` has passed.
pub fn block_on_timeout<F: Future>(future: F, timeout: Duration) -> Result<F::Output, Elapsed> {
    let deadline = Instant::now() + timeout;
    let (parker, waker) = parker_waker();
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return Ok(output);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Elapsed(timeout));
        }
        parker.park_timeout(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future;

    #[test]
    fn ready_future_completes_immediately() {
        assert_eq!(block_on(future::ready(5)), 5);
    }

    #[test]
    fn pending_future_times_out() {
        let result = block_on_timeout(future::pending::<()>(), Duration::from_millis(5));
        assert_eq!(result, Err(Elapsed(Duration::from_millis(5))));
    }
}
