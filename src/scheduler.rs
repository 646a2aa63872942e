//! Timer/scheduler engine.
//!
//! Two fixed-size worker pools execute delayed and fixed-rate tasks:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Scheduler                             │
//! │                                                              │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐  │
//! │  │ Daemon pool              │  │ Non-daemon pool          │  │
//! │  │  filter ageing           │  │  input polling           │  │
//! │  │  push-event draining     │  │  (keeps the app alive)   │  │
//! │  └────────────┬─────────────┘  └────────────┬─────────────┘  │
//! │               │                             │                │
//! │               ▼                             ▼                │
//! │        due-time heap ──▶ worker threads ──▶ task closure     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rust has no daemon threads, so "keeps the process alive" is explicit:
//! an application that listens through poll-mode devices calls
//! [`Scheduler::await_non_daemon`] from `main`, which returns once every
//! non-daemon task has been cancelled or finished.  Daemon tasks are
//! simply discarded by [`Scheduler::shutdown`].
//!
//! Invocations of one task never overlap.  A periodic task runs until it
//! returns [`TaskOutcome::Stop`] or its [`TaskHandle`] is cancelled; a
//! panic inside one invocation is logged and the task stays scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════
//  Task types
// ═══════════════════════════════════════════════════════════════

/// Which pool a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskGroup {
    /// Housekeeping that must not keep the application alive.
    Daemon,
    /// Work the application waits on (input polling).
    NonDaemon,
}

impl fmt::Display for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daemon => write!(f, "daemon"),
            Self::NonDaemon => write!(f, "non-daemon"),
        }
    }
}

/// Returned by every task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Keep the task scheduled (ignored for one-shot tasks).
    Continue,
    /// De-schedule the task, e.g. because its device was closed.
    Stop,
}

/// The type of schedule determines how and when a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Fire every `interval` at a fixed rate.
    Periodic { interval: Duration },
    /// Fire once, then retire.
    OneShot,
}

type Job = Box<dyn FnMut() -> TaskOutcome + Send>;

#[derive(Debug, Default)]
struct TaskState {
    cancelled: bool,
    retired: bool,
    running_on: Option<ThreadId>,
}

struct Task {
    id: u64,
    kind: ScheduleKind,
    job: Mutex<Job>,
    state: Mutex<TaskState>,
    idle: Condvar,
}

impl Task {
    /// Mark the task as running on this thread.  `false` if cancelled.
    fn begin(&self) -> bool {
        let mut st = self.state.lock();
        if st.cancelled {
            return false;
        }
        st.running_on = Some(thread::current().id());
        true
    }

    fn end(&self) {
        let mut st = self.state.lock();
        st.running_on = None;
        self.idle.notify_all();
    }

    /// Flag the task cancelled and wait out an in-flight invocation,
    /// unless that invocation is the caller itself.
    fn cancel(&self) {
        let mut st = self.state.lock();
        st.cancelled = true;
        let me = thread::current().id();
        while st.running_on.is_some_and(|t| t != me) {
            self.idle.wait(&mut st);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Mark retired.  Returns `true` the first time only.
    fn retire(&self) -> bool {
        let mut st = self.state.lock();
        !std::mem::replace(&mut st.retired, true)
    }
}

/// Heap entry: earliest due time first, then submission order.
struct Scheduled {
    due: Instant,
    seq: u64,
    task: Arc<Task>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Worker pool
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct PoolState {
    queue: BinaryHeap<Scheduled>,
    /// Tasks scheduled and not yet retired.
    live: usize,
    next_seq: u64,
    shutdown: bool,
}

struct PoolShared {
    group: TaskGroup,
    state: Mutex<PoolState>,
    work_ready: Condvar,
    drained: Condvar,
}

impl PoolShared {
    fn push(&self, st: &mut PoolState, due: Instant, task: Arc<Task>) {
        let seq = st.next_seq;
        st.next_seq += 1;
        st.queue.push(Scheduled { due, seq, task });
        self.work_ready.notify_one();
    }

    fn retire(&self, task: &Task) {
        if task.retire() {
            let mut st = self.state.lock();
            st.live = st.live.saturating_sub(1);
            if st.live == 0 {
                self.drained.notify_all();
            }
        }
    }

    fn worker_loop(self: &Arc<Self>) {
        loop {
            let entry = {
                let mut st = self.state.lock();
                loop {
                    if st.shutdown {
                        return;
                    }
                    let next_due = st.queue.peek().map(|s| s.due);
                    match next_due {
                        None => self.work_ready.wait(&mut st),
                        Some(due) if due <= Instant::now() => break,
                        Some(due) => {
                            self.work_ready.wait_until(&mut st, due);
                        }
                    }
                }
                match st.queue.pop() {
                    Some(entry) => entry,
                    None => continue,
                }
            };
            self.run(entry);
        }
    }

    fn run(&self, entry: Scheduled) {
        let task = entry.task;
        if !task.begin() {
            self.retire(&task);
            return;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut job = task.job.lock();
            (*job)()
        }));
        task.end();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "Scheduler({}): task {} panicked; keeping it scheduled",
                    self.group, task.id
                );
                TaskOutcome::Continue
            }
        };

        match (task.kind, outcome) {
            (ScheduleKind::Periodic { interval }, TaskOutcome::Continue) => {
                let mut st = self.state.lock();
                if st.shutdown || task.is_cancelled() {
                    drop(st);
                    self.retire(&task);
                    return;
                }
                // Fixed rate; missed periods are not replayed.
                let now = Instant::now();
                let next = (entry.due + interval).max(now);
                self.push(&mut st, next, task);
            }
            (ScheduleKind::Periodic { .. }, TaskOutcome::Stop) => {
                debug!("Scheduler({}): task {} stopped itself", self.group, task.id);
                self.retire(&task);
            }
            (ScheduleKind::OneShot, _) => self.retire(&task),
        }
    }
}

struct Pool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    fn start(group: TaskGroup, workers: usize) -> Result<Self> {
        let shared = Arc::new(PoolShared {
            group,
            state: Mutex::new(PoolState::default()),
            work_ready: Condvar::new(),
            drained: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("pinio-{group}-{i}"))
                .spawn(move || shared.worker_loop())
                .map_err(Error::Spawn)?;
            handles.push(handle);
        }
        info!("Scheduler: {group} pool started with {workers} workers");

        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    fn schedule(&self, task: Arc<Task>, delay: Duration) -> Option<TaskHandle> {
        let mut st = self.shared.state.lock();
        if st.shutdown {
            return None;
        }
        st.live += 1;
        let handle = TaskHandle {
            id: task.id,
            group: self.shared.group,
            task: Arc::clone(&task),
            pool: Arc::downgrade(&self.shared),
        };
        self.shared.push(&mut st, Instant::now() + delay, task);
        Some(handle)
    }

    fn shutdown(&self) {
        let discarded = {
            let mut st = self.shared.state.lock();
            if st.shutdown {
                return;
            }
            st.shutdown = true;
            let discarded = st.queue.len();
            st.queue.clear();
            st.live = 0;
            self.shared.work_ready.notify_all();
            self.shared.drained.notify_all();
            discarded
        };

        let me = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            // A worker can end up dropping the last scheduler reference.
            if handle.thread().id() == me {
                continue;
            }
            let _ = handle.join();
        }
        info!(
            "Scheduler: {} pool shut down ({} pending tasks discarded)",
            self.shared.group, discarded
        );
    }
}

// ═══════════════════════════════════════════════════════════════
//  Public handles
// ═══════════════════════════════════════════════════════════════

/// Cancellation handle returned by the schedule calls.
#[derive(Clone)]
pub struct TaskHandle {
    id: u64,
    group: TaskGroup,
    task: Arc<Task>,
    pool: Weak<PoolShared>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn group(&self) -> TaskGroup {
        self.group
    }

    /// Cancel the task.
    ///
    /// After this returns no further invocation will start, and any
    /// invocation running on another thread has finished.  Safe to call
    /// from inside the task itself.
    pub fn cancel(&self) {
        self.task.cancel();
        if let Some(pool) = self.pool.upgrade() {
            pool.retire(&self.task);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

/// The scheduler: one daemon pool and one non-daemon pool.
pub struct Scheduler {
    daemon: Pool,
    non_daemon: Pool,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(daemon_workers: usize, non_daemon_workers: usize) -> Result<Self> {
        Ok(Self {
            daemon: Pool::start(TaskGroup::Daemon, daemon_workers.max(1))?,
            non_daemon: Pool::start(TaskGroup::NonDaemon, non_daemon_workers.max(1))?,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        Self::new(config.daemon_workers, config.non_daemon_workers)
    }

    fn pool(&self, group: TaskGroup) -> &Pool {
        match group {
            TaskGroup::Daemon => &self.daemon,
            TaskGroup::NonDaemon => &self.non_daemon,
        }
    }

    fn submit(&self, kind: ScheduleKind, job: Job, delay: Duration, group: TaskGroup) -> Option<TaskHandle> {
        let task = Arc::new(Task {
            id: self.next_id.fetch_add(1, AtomicOrdering::Relaxed),
            kind,
            job: Mutex::new(job),
            state: Mutex::new(TaskState::default()),
            idle: Condvar::new(),
        });
        let handle = self.pool(group).schedule(task, delay);
        if handle.is_none() {
            warn!("Scheduler: {group} pool is shut down, task rejected");
        }
        handle
    }

    /// Run `task` every `interval` after `initial_delay`.
    ///
    /// Returns `None` if the scheduler has been shut down.
    pub fn schedule_periodic<F>(
        &self,
        task: F,
        initial_delay: Duration,
        interval: Duration,
        group: TaskGroup,
    ) -> Option<TaskHandle>
    where
        F: FnMut() -> TaskOutcome + Send + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));
        self.submit(ScheduleKind::Periodic { interval }, Box::new(task), initial_delay, group)
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once<F>(&self, task: F, delay: Duration, group: TaskGroup) -> Option<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = Some(task);
        let job: Job = Box::new(move || {
            if let Some(task) = task.take() {
                task();
            }
            TaskOutcome::Stop
        });
        self.submit(ScheduleKind::OneShot, job, delay, group)
    }

    /// Same as [`TaskHandle::cancel`].
    pub fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
    }

    /// Tasks in `group` scheduled and not yet finished or cancelled.
    pub fn live_tasks(&self, group: TaskGroup) -> usize {
        self.pool(group).shared.state.lock().live
    }

    /// Block until the non-daemon pool has no live tasks.
    ///
    /// `None` waits indefinitely.  Returns `false` on timeout.
    pub fn await_non_daemon(&self, timeout: Option<Duration>) -> bool {
        let shared = &self.non_daemon.shared;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = shared.state.lock();
        while st.live > 0 && !st.shutdown {
            match deadline {
                None => shared.drained.wait(&mut st),
                Some(deadline) => {
                    if shared.drained.wait_until(&mut st, deadline).timed_out() {
                        return st.live == 0 || st.shutdown;
                    }
                }
            }
        }
        true
    }

    /// Stop both pools, discarding pending tasks, and join the workers.
    pub fn shutdown(&self) {
        self.daemon.shutdown();
        self.non_daemon.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.non_daemon.shared.state.lock().shutdown
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("daemon_live", &self.live_tasks(TaskGroup::Daemon))
            .field("non_daemon_live", &self.live_tasks(TaskGroup::NonDaemon))
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
