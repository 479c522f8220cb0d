//! Lightweight cooperative tasks multiplexed over a few OS threads.
//!
//! A task is a future that yields only where it awaits, in practice only at a
//! [`CountingSemaphore`](crate::concurrency::CountingSemaphore) wait or at a
//! pending remote fetch. A suspended task is resumed by its waker and may
//! continue on a different worker thread than the one it suspended on.
//!
//! Task bodies return a terminal [`TaskState`] as their disposition.

pub mod block_on;
pub mod config;
pub mod scheduler;
pub mod task;

pub use block_on::{block_on, block_on_timeout};
pub use config::SchedulerConfig;
pub use scheduler::Scheduler;
pub use task::TaskHandle;

use core::fmt;
use std::cell::Cell;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskState {
    /// Created, not yet handed to the scheduler.
    Init = 0,
    /// Currently being polled on a worker thread.
    Active = 1,
    /// Ready to run, waiting for a worker.
    Pending = 2,
    /// Waiting for a synchronization event; resumed by its waker.
    Suspended = 3,
    /// Dropped by the scheduler before it finished (e.g. at shutdown).
    Depleted = 4,
    /// Finished; removed from the scheduler.
    Terminated = 5,
}

impl TaskState {
    /// Human-readable name of the state.
    pub const fn name(self) -> &'static str {
        match self {
            TaskState::Init => "init",
            TaskState::Active => "active",
            TaskState::Pending => "pending",
            TaskState::Suspended => "suspended",
            TaskState::Depleted => "depleted",
            TaskState::Terminated => "terminated",
        }
    }

    /// Returns `true` for states a task never leaves.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, TaskState::Depleted | TaskState::Terminated)
    }

    #[inline]
    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Init,
            1 => TaskState::Active,
            2 => TaskState::Pending,
            3 => TaskState::Suspended,
            4 => TaskState::Depleted,
            _ => TaskState::Terminated,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a timed wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    /// The awaited event happened.
    Signaled,
    /// The timeout expired first.
    Timeout,
}

/// Identifier of a spawned task, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[inline]
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// Returns the id of the task being polled on this thread, or `None` off the scheduler.
pub fn current_task_id() -> Option<TaskId> {
    CURRENT_TASK.with(Cell::get)
}

/// Marks a task as current for the duration of a poll.
pub(crate) struct CurrentTaskGuard {
    previous: Option<TaskId>,
}

impl CurrentTaskGuard {
    pub(crate) fn enter(id: TaskId) -> Self {
        let previous = CURRENT_TASK.with(|c| c.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|c| c.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            TaskState::Init,
            TaskState::Active,
            TaskState::Pending,
            TaskState::Suspended,
            TaskState::Depleted,
            TaskState::Terminated,
        ] {
            assert_eq!(TaskState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn only_depleted_and_terminated_are_terminal() {
        assert!(TaskState::Terminated.is_terminal());
        assert!(TaskState::Depleted.is_terminal());
        assert!(!TaskState::Suspended.is_terminal());
        assert_eq!(TaskState::Suspended.to_string(), "suspended");
    }

    #[test]
    fn current_task_is_scoped() {
        assert_eq!(current_task_id(), None);
        {
            let _guard = CurrentTaskGuard::enter(TaskId::new(7));
            assert_eq!(current_task_id(), Some(TaskId::new(7)));
        }
        assert_eq!(current_task_id(), None);
    }
}
