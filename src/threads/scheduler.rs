//! Work-stealing scheduler for cooperative tasks.
//!
//! # Architecture
//!
//! - N worker threads, each with a local FIFO deque
//! - A global injector that every spawn and every wakeup pushes to
//! - Idle workers steal a batch from the injector, then from their peers,
//!   and park (with a timeout) when nothing is runnable
//!
//! A task occupies a worker only while it is being polled. Everything that
//! waits does so by returning `Pending`, so a handful of threads can host
//! any number of suspended stencil drivers and fetches.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::iter;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_deque::{Injector, Stealer, Worker};
use crossbeam_utils::sync::{Parker, Unparker};
use tracing::{debug, trace};

use super::config::SchedulerConfig;
use super::task::{Task, TaskHandle};
use super::{TaskId, TaskState};
use crate::error::{CellError, SchedulerError};

/// State shared between the scheduler handle, its workers and its tasks.
pub(crate) struct Shared {
    config: SchedulerConfig,
    injector: Injector<Arc<Task>>,
    stealers: Vec<Stealer<Arc<Task>>>,
    unparkers: Vec<Unparker>,
    next_unpark: AtomicUsize,
    next_id: AtomicU64,
    spawned: AtomicU64,
    tasks: Mutex<HashMap<TaskId, Weak<Task>>>,
    shutdown: AtomicBool,
}

impl Shared {
    /// Queues a runnable task and wakes a worker.
    pub(crate) fn push(&self, task: Arc<Task>) {
        if self.shutdown.load(Ordering::Acquire) {
            task.deplete();
            return;
        }
        self.injector.push(task);
        let i = self.next_unpark.fetch_add(1, Ordering::Relaxed) % self.unparkers.len();
        self.unparkers[i].unpark();
    }

    /// Forgets a finished task.
    pub(crate) fn retire(&self, id: TaskId) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn live(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn find_task(&self, local: &Worker<Arc<Task>>, index: usize) -> Option<Arc<Task>> {
        local.pop().or_else(|| {
            iter::repeat_with(|| {
                self.injector.steal_batch_and_pop(local).or_else(|| {
                    self.stealers
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != index)
                        .map(|(_, s)| s.steal())
                        .collect()
                })
            })
            .find(|s| !s.is_retry())
            .and_then(|s| s.success())
        })
    }
}

/// A pool of worker threads polling cooperative tasks.
///
/// Dropping the scheduler shuts it down: workers stop, and tasks that have
/// not finished are depleted.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Starts `config.workers` worker threads.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;

        let locals: Vec<Worker<Arc<Task>>> =
            (0..config.workers).map(|_| Worker::new_fifo()).collect();
        let parkers: Vec<Parker> = (0..config.workers).map(|_| Parker::new()).collect();

        let shared = Arc::new(Shared {
            stealers: locals.iter().map(Worker::stealer).collect(),
            unparkers: parkers.iter().map(|p| p.unparker().clone()).collect(),
            injector: Injector::new(),
            next_unpark: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            spawned: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            config,
        });

        let scheduler = Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(shared.config.workers)),
        };

        for (index, (local, parker)) in locals.into_iter().zip(parkers).enumerate() {
            let mut builder =
                thread::Builder::new().name(format!("{}-{index}", shared.config.thread_name));
            if let Some(stack_size) = shared.config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let worker_shared = Arc::clone(&shared);
            // On failure `scheduler` is dropped here, which stops the workers already started.
            let handle = builder.spawn(move || worker_loop(&worker_shared, &local, &parker, index))?;
            scheduler
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }

        debug!(workers = shared.config.workers, "scheduler started");
        Ok(scheduler)
    }

    /// Schedules `future` as a new task and returns its handle.
    ///
    /// The future's output is the task's terminal disposition, normally
    /// [`TaskState::Terminated`].
    pub fn spawn<F>(
        &self,
        description: impl Into<Cow<'static, str>>,
        future: F,
    ) -> Result<TaskHandle, CellError>
    where
        F: Future<Output = TaskState> + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(CellError::SchedulerShutdown);
        }

        let id = TaskId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let task = Arc::new(Task::new(
            id,
            description.into(),
            Box::pin(future),
            Arc::downgrade(&self.shared),
        ));
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::downgrade(&task));
        self.shared.spawned.fetch_add(1, Ordering::Relaxed);

        let handle = TaskHandle::new(Arc::clone(&task));
        trace!(task = %id, description = handle.description(), "spawned");
        task.schedule();
        Ok(handle)
    }

    /// Number of tasks spawned and not yet finished.
    pub fn live_tasks(&self) -> usize {
        self.shared.live()
    }

    /// Total number of tasks spawned so far.
    pub fn spawned_tasks(&self) -> u64 {
        self.shared.spawned.load(Ordering::Relaxed)
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.shared.config.workers
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stops the workers and depletes every unfinished task.
    ///
    /// Safe to call from inside a task; the calling worker is not joined.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for unparker in &self.shared.unparkers {
            unparker.unpark();
        }

        let handles = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }

        while let Some(task) = self.shared.injector.steal().success() {
            task.deplete();
        }
        let remaining: Vec<Arc<Task>> = self
            .shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .filter_map(|(_, task)| task.upgrade())
            .collect();
        for task in remaining {
            task.deplete();
        }
        debug!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers())
            .field("live_tasks", &self.live_tasks())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn worker_loop(shared: &Shared, local: &Worker<Arc<Task>>, parker: &Parker, index: usize) {
    debug!(worker = index, "worker started");
    while !shared.shutdown.load(Ordering::Acquire) {
        match shared.find_task(local, index) {
            Some(task) => task.run(),
            None => parker.park_timeout(shared.config.park_timeout()),
        }
    }
    while let Some(task) = local.pop() {
        task.deplete();
    }
    debug!(worker = index, "worker stopped");
}
