use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stencil_flow::{
    block_on, current_task_id, CountingSemaphore, Scheduler, SchedulerConfig, TaskState,
};

fn scheduler(workers: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig::default().with_workers(workers)).unwrap()
}

#[test]
fn test_many_tasks_over_few_threads() {
    const TASKS: usize = 500;

    let scheduler = scheduler(2);
    let gate = Arc::new(CountingSemaphore::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    // Far more suspended tasks than worker threads.
    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            scheduler
                .spawn("parked", async move {
                    gate.wait(1).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    TaskState::Terminated
                })
                .unwrap()
        })
        .collect();

    while gate.waiters() < TASKS {
        std::thread::yield_now();
    }
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    gate.signal(TASKS);

    for handle in &handles {
        assert_eq!(handle.join(), TaskState::Terminated);
    }
    assert_eq!(finished.load(Ordering::SeqCst), TASKS);
    assert_eq!(scheduler.live_tasks(), 0);
    assert_eq!(scheduler.spawned_tasks(), TASKS as u64);
}

#[test]
fn test_ping_pong_between_tasks() {
    const ROUNDS: usize = 1_000;

    let scheduler = scheduler(2);
    let ping = Arc::new(CountingSemaphore::new(0));
    let pong = Arc::new(CountingSemaphore::new(0));
    let hits = Arc::new(AtomicUsize::new(0));

    let server = {
        let (ping, pong, hits) = (Arc::clone(&ping), Arc::clone(&pong), Arc::clone(&hits));
        scheduler
            .spawn("pong", async move {
                for _ in 0..ROUNDS {
                    ping.wait(1).await;
                    hits.fetch_add(1, Ordering::SeqCst);
                    pong.signal(1);
                }
                TaskState::Terminated
            })
            .unwrap()
    };
    let client = {
        let (ping, pong) = (Arc::clone(&ping), Arc::clone(&pong));
        scheduler
            .spawn("ping", async move {
                for _ in 0..ROUNDS {
                    ping.signal(1);
                    pong.wait(1).await;
                }
                TaskState::Terminated
            })
            .unwrap()
    };

    assert_eq!(client.join(), TaskState::Terminated);
    assert_eq!(server.join(), TaskState::Terminated);
    assert_eq!(hits.load(Ordering::SeqCst), ROUNDS);
}

#[test]
fn test_task_can_await_another_task() {
    let scheduler = Arc::new(scheduler(2));
    let inner_scheduler = Arc::clone(&scheduler);
    let outer = scheduler
        .spawn("outer", async move {
            let inner = inner_scheduler
                .spawn("inner", async { TaskState::Terminated })
                .unwrap();
            assert_eq!(inner.wait().await, TaskState::Terminated);
            assert!(current_task_id().is_some());
            TaskState::Terminated
        })
        .unwrap();
    assert_eq!(
        outer.join_timeout(Duration::from_secs(5)),
        Ok(TaskState::Terminated)
    );
    assert!(current_task_id().is_none());
}

#[test]
fn test_join_timeout_on_stuck_task() {
    let scheduler = scheduler(1);
    let gate = Arc::new(CountingSemaphore::new(0));
    let task_gate = Arc::clone(&gate);
    let handle = scheduler
        .spawn("stuck", async move {
            task_gate.wait(1).await;
            TaskState::Terminated
        })
        .unwrap();

    assert!(handle.join_timeout(Duration::from_millis(20)).is_err());
    assert!(!handle.is_terminated());
    gate.signal(1);
    assert_eq!(block_on(handle.wait()), TaskState::Terminated);
    // A finished task can be joined any number of times.
    assert_eq!(handle.join(), TaskState::Terminated);
}

#[test]
fn test_config_from_json_drives_worker_count() {
    let config = SchedulerConfig::from_json(
        r#"{ "workers": 3, "thread_name": "cells", "park_timeout_us": 100 }"#,
    )
    .unwrap();
    let scheduler = Scheduler::new(config).unwrap();
    assert_eq!(scheduler.workers(), 3);

    let handle = scheduler
        .spawn("named", async {
            let name = std::thread::current().name().map(str::to_owned);
            assert!(name.is_some_and(|n| n.starts_with("cells-")));
            TaskState::Terminated
        })
        .unwrap();
    assert_eq!(handle.join(), TaskState::Terminated);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = SchedulerConfig {
        workers: 0,
        ..SchedulerConfig::default()
    };
    assert!(Scheduler::new(config).is_err());
}
