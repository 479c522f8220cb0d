//! Spawned tasks and the handles that observe them.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use super::scheduler::Shared;
use super::{block_on, block_on_timeout, CurrentTaskGuard, TaskId, TaskState};
use crate::concurrency::CountingSemaphore;
use crate::error::Elapsed;

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = TaskState> + Send + 'static>>;

/// A unit of work owned by the scheduler.
///
/// # States
/// - `Init` until handed to the scheduler
/// - `Pending` while queued, `Active` while polled
/// - `Suspended` after a poll returned `Pending` with no wakeup in between
/// - `Terminated` / `Depleted` once finished or dropped
///
/// A wakeup that arrives while the task is `Active` flips it to `Pending`;
/// the worker notices when the poll returns and requeues the task.
pub(crate) struct Task {
    id: TaskId,
    description: Cow<'static, str>,
    state: AtomicU8,
    panicked: AtomicBool,
    future: Mutex<Option<TaskFuture>>,
    done: CountingSemaphore,
    scheduler: Weak<Shared>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        description: Cow<'static, str>,
        future: TaskFuture,
        scheduler: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            description,
            state: AtomicU8::new(TaskState::Init as u8),
            panicked: AtomicBool::new(false),
            future: Mutex::new(Some(future)),
            done: CountingSemaphore::new(0),
            scheduler,
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Hands a freshly created task to the scheduler.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let claimed = self.state.compare_exchange(
            TaskState::Init as u8,
            TaskState::Pending as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug_assert!(claimed.is_ok(), "task scheduled twice");
        self.enqueue();
    }

    fn enqueue(self: &Arc<Self>) {
        match self.scheduler.upgrade() {
            Some(shared) => shared.push(Arc::clone(self)),
            None => self.deplete(),
        }
    }

    /// Polls the task once. Called by a worker that dequeued it.
    pub(crate) fn run(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(
                TaskState::Pending as u8,
                TaskState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Depleted while queued.
            return;
        }

        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        let mut slot = self.future.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(future) = slot.as_mut() else {
            return;
        };

        let polled = {
            let _current = CurrentTaskGuard::enter(self.id);
            panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        };

        match polled {
            Ok(Poll::Pending) => {
                drop(slot);
                if self
                    .state
                    .compare_exchange(
                        TaskState::Active as u8,
                        TaskState::Suspended as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    // Woken while running.
                    self.enqueue();
                } else {
                    trace!(task = %self.id, "suspended");
                }
            }
            Ok(Poll::Ready(disposition)) => {
                let future = slot.take();
                drop(slot);
                drop(future);
                self.finish(disposition);
            }
            Err(payload) => {
                error!(
                    task = %self.id,
                    description = %self.description,
                    panicked = true,
                    message = panic_message(&*payload),
                    "task panicked"
                );
                self.panicked.store(true, Ordering::Release);
                let future = slot.take();
                drop(slot);
                drop(future);
                self.finish(TaskState::Terminated);
            }
        }
    }

    fn notify(self: &Arc<Self>) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = TaskState::from_u8(current);
            if !matches!(state, TaskState::Suspended | TaskState::Active) {
                return;
            }
            match self.state.compare_exchange_weak(
                current,
                TaskState::Pending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if state == TaskState::Suspended {
                        self.enqueue();
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn finish(&self, disposition: TaskState) {
        let disposition = if disposition.is_terminal() {
            disposition
        } else {
            warn!(task = %self.id, %disposition, "task returned a non-terminal disposition");
            TaskState::Terminated
        };
        self.state.store(disposition as u8, Ordering::Release);
        if let Some(shared) = self.scheduler.upgrade() {
            shared.retire(self.id);
        }
        debug!(task = %self.id, description = %self.description, %disposition, "task finished");
        self.done.signal(1);
    }

    /// Drops the task's future without running it to completion.
    ///
    /// A task that is being polled right now is left alone; it finishes on its own.
    pub(crate) fn deplete(&self) {
        let future = match self.future.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
            Err(TryLockError::WouldBlock) => return,
        };
        let Some(future) = future else {
            return;
        };

        let mut current = self.state.load(Ordering::Acquire);
        while !TaskState::from_u8(current).is_terminal() {
            match self.state.compare_exchange_weak(
                current,
                TaskState::Depleted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        drop(future);
        debug!(task = %self.id, description = %self.description, "task depleted");
        self.done.signal(1);
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Future returned by [`catch_unwind`].
pub(crate) struct CatchUnwind<F> {
    future: Pin<Box<F>>,
}

/// Polls `future`, turning a panic inside it into an `Err` carrying the payload.
///
/// After a panic the inner future is poisoned and must not be polled again;
/// the wrapper completes instead.
pub(crate) fn catch_unwind<F: Future>(future: F) -> CatchUnwind<F> {
    CatchUnwind {
        future: Box::pin(future),
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let future = self.future.as_mut();
        match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.notify();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notify();
    }
}

/// A handle to a spawned task.
///
/// Dropping the handle does not cancel the task; it keeps running until its
/// body returns.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    /// Returns the task id.
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Returns the description given at spawn time.
    pub fn description(&self) -> &str {
        &self.task.description
    }

    /// Returns the task's current state.
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Returns `true` if the task body panicked.
    ///
    /// Such a task still ends as [`TaskState::Terminated`].
    pub fn panicked(&self) -> bool {
        self.task.panicked.load(Ordering::Acquire)
    }

    /// Returns `true` once the task has terminated or been depleted.
    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Waits for the task to finish and returns its terminal state.
    pub async fn wait(&self) -> TaskState {
        self.task.done.wait(1).await;
        // Pass the completion on to any other waiter.
        self.task.done.signal(1);
        self.state()
    }

    /// Blocks the calling OS thread until the task finishes.
    pub fn join(&self) -> TaskState {
        block_on(self.wait())
    }

    /// Like [`join`](Self::join), but gives up after `timeout`.
    pub fn join_timeout(&self, timeout: Duration) -> Result<TaskState, Elapsed> {
        block_on_timeout(self.wait(), timeout)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("description", &self.description())
            .field("state", &self.state())
            .field("panicked", &self.panicked())
            .finish()
    }
}
