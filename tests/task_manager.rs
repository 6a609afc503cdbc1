#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Per-key serial task queues: ordering, timeouts and queue lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use realtime_protocol::error::ProtocolError;
use realtime_protocol::utils::task_manager::{TaskHandle, TaskManager, DEFAULT_TASK_TIMEOUT};

type Log = Arc<Mutex<Vec<String>>>;
type Held = Arc<Mutex<Vec<TaskHandle<&'static str>>>>;

fn no_timeout() -> Option<fn()> {
    None
}

/// Add a task that records its label and parks its handle in `held`.
fn add_parked(manager: &TaskManager<&'static str>, key: &'static str, label: &str, log: &Log, held: &Held) {
    let label = label.to_string();
    let log = Arc::clone(log);
    let held = Arc::clone(held);
    manager
        .add_task(
            key,
            move |task| {
                log.lock().unwrap().push(label);
                held.lock().unwrap().push(task);
            },
            no_timeout(),
            DEFAULT_TASK_TIMEOUT,
        )
        .unwrap();
}

fn finish(held: &Held, label_index: usize) -> bool {
    let task = held.lock().unwrap()[label_index].clone();
    task.done()
}

#[tokio::test(start_paused = true)]
async fn tasks_run_in_order_per_key_and_keys_are_independent() {
    let manager = TaskManager::new();
    let log: Log = Arc::default();
    let held: Held = Arc::default();

    add_parked(&manager, "A", "A1", &log, &held);
    add_parked(&manager, "A", "A2", &log, &held);
    add_parked(&manager, "B", "B1", &log, &held);

    // A1 and B1 run right away; A2 waits for A1.
    assert_eq!(*log.lock().unwrap(), vec!["A1", "B1"]);
    assert_eq!(manager.pending(&"A"), 1);
    assert_eq!(manager.queue_count(), 2);

    // B1 finishing does not release A2.
    assert!(finish(&held, 1));
    assert_eq!(*log.lock().unwrap(), vec!["A1", "B1"]);
    assert!(!manager.has_queue(&"B"));

    assert!(finish(&held, 0));
    assert_eq!(*log.lock().unwrap(), vec!["A1", "B1", "A2"]);

    assert!(finish(&held, 2));
    assert_eq!(manager.queue_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_once_and_releases_the_queue() {
    let manager = TaskManager::new();
    let timeouts = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let held: Held = Arc::default();

    let counter = Arc::clone(&timeouts);
    let keep = Arc::clone(&held);
    manager
        .add_task(
            "A",
            move |task| keep.lock().unwrap().push(task),
            Some(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(100),
        )
        .unwrap();
    add_parked(&manager, "A", "next", &log, &held);
    assert!(log.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(*log.lock().unwrap(), vec!["next"]);

    // The late done() is ignored and does not disturb the running task.
    assert!(!finish(&held, 0));
    assert!(held.lock().unwrap()[0].timed_out());
    assert!(manager.has_queue(&"A"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn forced_close_cancels_timeouts_and_drops_waiting_tasks() {
    let manager = TaskManager::new();
    let timeouts = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let held: Held = Arc::default();

    let counter = Arc::clone(&timeouts);
    let keep = Arc::clone(&held);
    manager
        .add_task(
            "A",
            move |task| keep.lock().unwrap().push(task),
            Some(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(100),
        )
        .unwrap();
    add_parked(&manager, "A", "dropped", &log, &held);

    manager.close_queue(&"A", true);
    assert!(!manager.has_queue(&"A"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    assert!(log.lock().unwrap().is_empty());

    // The queue can be reused afterwards.
    add_parked(&manager, "A", "fresh", &log, &held);
    assert_eq!(*log.lock().unwrap(), vec!["fresh"]);
}

#[tokio::test(start_paused = true)]
async fn graceful_close_rejects_new_tasks() {
    let manager = TaskManager::new();
    let log: Log = Arc::default();
    let held: Held = Arc::default();

    add_parked(&manager, "A", "first", &log, &held);
    add_parked(&manager, "A", "second", &log, &held);
    manager.close_queue(&"A", false);

    let rejected = manager.add_task("A", |task| {
        task.done();
    }, no_timeout(), DEFAULT_TASK_TIMEOUT);
    assert!(matches!(rejected, Err(ProtocolError::QueueClosed)));

    assert!(finish(&held, 0));
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    assert!(finish(&held, 1));
    assert!(!manager.has_queue(&"A"));
}

#[tokio::test]
async fn closing_a_missing_queue_is_a_no_op() {
    let manager = TaskManager::<u64>::new();
    manager.close_queue(&42, true);
    manager.close_queue(&42, false);
    assert_eq!(manager.queue_count(), 0);
}

#[tokio::test]
async fn tasks_may_chain_more_tasks_from_inside() {
    let manager = TaskManager::<u8>::new();
    let log: Arc<Mutex<Vec<u8>>> = Arc::default();

    let inner = manager.clone();
    let outer_log = Arc::clone(&log);
    manager
        .add_task(
            1,
            move |task| {
                outer_log.lock().unwrap().push(1);
                let inner_log = Arc::clone(&outer_log);
                inner
                    .add_task(
                        1,
                        move |task| {
                            inner_log.lock().unwrap().push(2);
                            task.done();
                        },
                        no_timeout(),
                        DEFAULT_TASK_TIMEOUT,
                    )
                    .unwrap();
                task.done();
            },
            no_timeout(),
            DEFAULT_TASK_TIMEOUT,
        )
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    assert_eq!(manager.queue_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_keys_drain_to_empty() {
    let manager = TaskManager::<u32>::new();
    let ran = Arc::new(AtomicUsize::new(0));

    let mut workers = tokio::task::JoinSet::new();
    for worker in 0..8u32 {
        let manager = manager.clone();
        let ran = Arc::clone(&ran);
        workers.spawn(async move {
            for i in 0..100u32 {
                let ran = Arc::clone(&ran);
                manager
                    .add_task(
                        (worker * 100 + i) % 16,
                        move |task| {
                            ran.fetch_add(1, Ordering::SeqCst);
                            task.done();
                        },
                        no_timeout(),
                        DEFAULT_TASK_TIMEOUT,
                    )
                    .unwrap();
            }
        });
    }
    while let Some(result) = workers.join_next().await {
        result.unwrap();
    }

    assert_eq!(ran.load(Ordering::SeqCst), 800);
    assert_eq!(manager.queue_count(), 0);
}
