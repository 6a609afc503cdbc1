//! Per-key serial task queues with bounded waits.
//!
//! Tasks that share a key run one at a time in submission order. The active
//! task holds the key until it calls [`TaskHandle::done`] or its timeout fires;
//! either event activates the next queued task. Queues are created on first
//! use and removed as soon as they run empty.
//!
//! The task closure runs on the caller's thread when the task is activated and
//! never under the queue lock, so a closure may call `done()` right away or add
//! more tasks.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};

/// Default wait for an active task before the queue moves on.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_millis(3000);

const RUNNING: u8 = 0;
const DONE: u8 = 1;
const TIMED_OUT: u8 = 2;

type TaskFn<K> = Box<dyn FnOnce(TaskHandle<K>) + Send>;
type TimeoutFn = Box<dyn FnOnce() + Send>;

struct Pending<K> {
    run: TaskFn<K>,
    on_timeout: Option<TimeoutFn>,
    timeout: Duration,
}

struct Active {
    id: u64,
    timer: CancellationToken,
}

struct Queue<K> {
    active: Option<Active>,
    pending: VecDeque<Pending<K>>,
    /// Set by a graceful close: no new tasks, no timers, drain what is queued.
    closing: bool,
}

impl<K> Queue<K> {
    fn new() -> Self {
        Self {
            active: None,
            pending: VecDeque::new(),
            closing: false,
        }
    }
}

struct Shared<K> {
    queues: Mutex<HashMap<K, Queue<K>>>,
    next_id: AtomicU64,
}

/// Completion handle passed to every task.
pub struct TaskHandle<K> {
    key: K,
    id: u64,
    state: Arc<AtomicU8>,
    manager: Weak<Shared<K>>,
}

impl<K> TaskHandle<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Mark the task finished and activate the next one for the key.
    ///
    /// Returns `true` if the task finished before its timeout. A second call,
    /// or a call after the timeout fired, returns `false` and does nothing.
    pub fn done(&self) -> bool {
        if self
            .state
            .compare_exchange(RUNNING, DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Some(shared) = self.manager.upgrade() {
            advance(&shared, &self.key, self.id);
        }
        true
    }

    /// Whether the task has completed, by `done()` or by timeout.
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    /// Whether the task was abandoned by its timeout.
    pub fn timed_out(&self) -> bool {
        self.state.load(Ordering::Acquire) == TIMED_OUT
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Clone> Clone for TaskHandle<K> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            id: self.id,
            state: Arc::clone(&self.state),
            manager: Weak::clone(&self.manager),
        }
    }
}

impl<K: Debug> Debug for TaskHandle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

/// Serial task queues keyed by `K` (usually a session id).
///
/// Must be used from inside a tokio runtime; task timers are tokio tasks.
pub struct TaskManager<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for TaskManager<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> Default for TaskManager<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TaskManager<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queue `run` behind the tasks already waiting on `key`.
    ///
    /// If nothing is active for the key, `run` is called before this returns.
    /// `on_timeout` is called at most once if the task is still running after
    /// `timeout`; the queue then moves on without it.
    ///
    /// # Errors
    /// `ProtocolError::QueueClosed` while the key's queue is draining after a
    /// graceful [`close_queue`](Self::close_queue).
    pub fn add_task<F, T>(&self, key: K, run: F, on_timeout: Option<T>, timeout: Duration) -> Result<()>
    where
        F: FnOnce(TaskHandle<K>) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let task = Pending {
            run: Box::new(run),
            on_timeout: on_timeout.map(|f| Box::new(f) as TimeoutFn),
            timeout,
        };

        let start = {
            let mut queues = lock(&self.shared);
            let queue = queues.entry(key.clone()).or_insert_with(Queue::new);
            if queue.closing {
                return Err(ProtocolError::QueueClosed);
            }
            if queue.active.is_some() {
                queue.pending.push_back(task);
                debug!(?key, queued = queue.pending.len(), "Task queued");
                None
            } else {
                Some(activate(&self.shared, &key, queue, task))
            }
        };

        if let Some(start) = start {
            start.run();
        }
        Ok(())
    }

    /// Close the queue for `key`.
    ///
    /// Both modes cancel the active task's timer, so no timeout fires for the
    /// key afterwards. `force` drops the queue together with its waiting tasks.
    /// Otherwise the queue rejects new tasks and runs the waiting ones, without
    /// timers, as each predecessor calls `done()`, and is removed once drained.
    /// Closing a key with no queue is a no-op.
    pub fn close_queue(&self, key: &K, force: bool) {
        let mut queues = lock(&self.shared);
        let Some(queue) = queues.get_mut(key) else {
            return;
        };

        if let Some(active) = &queue.active {
            active.timer.cancel();
        }

        if force || (queue.active.is_none() && queue.pending.is_empty()) {
            if let Some(queue) = queues.remove(key) {
                debug!(?key, dropped = queue.pending.len(), "Task queue closed");
            }
        } else {
            queue.closing = true;
            debug!(?key, pending = queue.pending.len(), "Task queue draining");
        }
    }

    /// Number of keys with a live queue.
    pub fn queue_count(&self) -> usize {
        lock(&self.shared).len()
    }

    pub fn has_queue(&self, key: &K) -> bool {
        lock(&self.shared).contains_key(key)
    }

    /// Tasks waiting behind the active one for `key`.
    pub fn pending(&self, key: &K) -> usize {
        lock(&self.shared).get(key).map_or(0, |q| q.pending.len())
    }
}

fn lock<K>(shared: &Shared<K>) -> MutexGuard<'_, HashMap<K, Queue<K>>> {
    // A panicking task closure never runs under this lock, so the map is
    // consistent even if the mutex was poisoned elsewhere.
    shared.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A task made active under the lock, to be started after the lock is released.
struct Start<K> {
    run: TaskFn<K>,
    handle: TaskHandle<K>,
}

impl<K> Start<K> {
    fn run(self) {
        (self.run)(self.handle);
    }
}

fn activate<K>(shared: &Arc<Shared<K>>, key: &K, queue: &mut Queue<K>, task: Pending<K>) -> Start<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    let timer = CancellationToken::new();
    let handle = TaskHandle {
        key: key.clone(),
        id,
        state: Arc::new(AtomicU8::new(RUNNING)),
        manager: Arc::downgrade(shared),
    };

    if !queue.closing {
        spawn_timer(handle.clone(), timer.clone(), task.on_timeout, task.timeout);
    }
    queue.active = Some(Active { id, timer });

    Start {
        run: task.run,
        handle,
    }
}

fn spawn_timer<K>(
    handle: TaskHandle<K>,
    timer: CancellationToken,
    on_timeout: Option<TimeoutFn>,
    timeout: Duration,
) where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                if handle
                    .state
                    .compare_exchange(RUNNING, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return;
                }
                warn!(key = ?handle.key, timeout_ms = timeout.as_millis() as u64, "Task timed out");
                if let Some(on_timeout) = on_timeout {
                    on_timeout();
                }
                if let Some(shared) = handle.manager.upgrade() {
                    advance(&shared, &handle.key, handle.id);
                }
            }
        }
    });
}

/// Retire task `id` on `key` and start the next queued task, if any.
fn advance<K>(shared: &Arc<Shared<K>>, key: &K, id: u64)
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    let start = {
        let mut queues = lock(shared);
        let Some(queue) = queues.get_mut(key) else {
            return;
        };
        match &queue.active {
            Some(active) if active.id == id => active.timer.cancel(),
            _ => return,
        }
        queue.active = None;

        match queue.pending.pop_front() {
            Some(next) => Some(activate(shared, key, queue, next)),
            None => {
                queues.remove(key);
                None
            }
        }
    };

    if let Some(start) = start {
        start.run();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn no_timeout() -> Option<fn()> {
        None
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_done_removes_queue() {
        let manager = TaskManager::<u32>::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        manager
            .add_task(
                7,
                move |task| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    assert!(task.done());
                    assert!(!task.done());
                },
                no_timeout(),
                DEFAULT_TASK_TIMEOUT,
            )
            .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!manager.has_queue(&7));
    }

    #[tokio::test(start_paused = true)]
    async fn done_after_timeout_reports_late() {
        let manager = TaskManager::<u32>::new();
        let slot = Arc::new(Mutex::new(None));
        let keep = Arc::clone(&slot);
        manager
            .add_task(
                1,
                move |task| *keep.lock().unwrap() = Some(task),
                no_timeout(),
                Duration::from_millis(50),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let task = slot.lock().unwrap().take().unwrap();
        assert!(task.is_done());
        assert!(task.timed_out());
        assert!(!task.done());
        assert_eq!(manager.queue_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_close_drains_without_timers() {
        let manager = TaskManager::<u32>::new();
        let handles = Arc::new(Mutex::new(Vec::new()));
        let timeouts = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let handles = Arc::clone(&handles);
            let timeouts = Arc::clone(&timeouts);
            manager
                .add_task(
                    1,
                    move |task| handles.lock().unwrap().push(task),
                    Some(move || {
                        timeouts.fetch_add(1, Ordering::SeqCst);
                    }),
                    Duration::from_millis(10),
                )
                .unwrap();
        }

        manager.close_queue(&1, false);
        assert!(matches!(
            manager.add_task(1, |_| {}, no_timeout(), DEFAULT_TASK_TIMEOUT),
            Err(ProtocolError::QueueClosed)
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);

        let first = handles.lock().unwrap()[0].clone();
        assert!(first.done());
        assert_eq!(handles.lock().unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);

        let second = handles.lock().unwrap()[1].clone();
        assert!(second.done());
        assert!(!manager.has_queue(&1));
    }
}
