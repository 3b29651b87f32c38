//! Work-Stealing Worker Pool
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                     WorkerPool                       │
//!                    │                                                      │
//!  submit() ─────────┼──► round-robin / local-first target                  │
//!  (any thread)      │          │                                           │
//!                    │          ▼                                           │
//!                    │   ┌─────────────┬─────────────┬─────────────┐        │
//!                    │   │  Worker 0   │  Worker 1   │  Worker N   │        │
//!                    │   │ ┌─────────┐ │ ┌─────────┐ │ ┌─────────┐ │        │
//!                    │   │ │WorkQueue│◄┼─┤WorkQueue│◄┼─┤WorkQueue│ │ steal  │
//!                    │   │ │ bounded │ │ │ bounded │ │ │ bounded │ │ front  │
//!                    │   │ └─────────┘ │ └─────────┘ │ └─────────┘ │        │
//!                    │   └─────────────┴─────────────┴─────────────┘        │
//!                    │                          ▲                           │
//!                    │   Shared: shutdown, awake, states, unparkers, fault  │
//!                    └──────────────────────────────────────────────────────┘
//!                                               ▲
//!               CompletionBarrier::join ────────┘ steal_some_work()
//! ```
//!
//! - N worker threads, each given an explicit [`PoolHandle`] (no global pool)
//! - One bounded [`WorkQueue`] per worker: owner LIFO, thieves FIFO
//! - Local-first submission from worker threads, round-robin otherwise
//! - Parker/Unparker per worker: a push unparks the queue's owner
//!
//! # Correctness Invariants
//!
//! - **Work-conserving**: an accepted task runs before its queue's owner
//!   exits (owners close their queue only while it is empty).
//! - **Gate**: once `send_shutdown` is observed, `submit` rejects new tasks.
//! - **No lost wakeups**: Parker tokens survive an unpark that races ahead of
//!   the park; parking also carries a timeout as a safety net.
//! - **Fault escalation**: the first panicking task body is captured, the pool
//!   shuts down, and `wait_for_workers_to_complete` re-raises the panic.
//!
//! # Teardown
//!
//! `send_shutdown()` then `wait_for_workers_to_complete()`. Both are
//! idempotent. Dropping a pool that skipped this sequence performs it.

use std::sync::atomic::{fence, AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::CachePadded;

use super::error::{PoolError, PushError, SubmitError};
use super::metrics::{MetricsSnapshot, WorkerMetricsLocal};
use super::task::{PanicPayload, Task, TaskHandle};
use super::work_queue::WorkQueue;
use super::worker::{Worker, WorkerState};
use super::worker_id::current_worker_in;

/// Default per-worker queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Source of distinct pool ids (for thread-local worker identity).
static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

// ============================================================================
// Configuration
// ============================================================================

/// Pool configuration, fixed at construction.
///
/// | Knob           | Workload Sensitivity                          |
/// |----------------|-----------------------------------------------|
/// | workers        | CPU count, whether the caller also joins      |
/// | queue_capacity | Burst size per frame, fan-out of graph tasks  |
/// | park_timeout   | Poll interval of joining callers              |
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Maximum tasks queued per worker. A full queue rejects pushes.
    pub queue_capacity: usize,

    /// Upper bound on one park. Pushes unpark the owner and, when the owner
    /// is busy, one parked peer; the timeout is a safety net and the poll
    /// interval of joining callers.
    pub park_timeout: Duration,

    /// Worker thread name prefix; threads are `{prefix}-{id}`.
    pub thread_name_prefix: String,

    /// Stack size for worker threads (platform default when `None`).
    pub stack_size: Option<usize>,

    /// Try to pin each worker to a core (requires `scheduler-affinity`).
    pub pin_threads: bool,
}

impl PoolConfig {
    /// Default config with an explicit worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig("workers must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig("queue_capacity must be > 0"));
        }
        if self.park_timeout.is_zero() {
            return Err(PoolError::InvalidConfig("park_timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// One worker per hardware thread, leaving one for the submitting thread.
    fn default() -> Self {
        let hw = thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            workers: hw.saturating_sub(1).max(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            park_timeout: Duration::from_millis(1),
            thread_name_prefix: "workgraph-worker".to_string(),
            stack_size: None,
            pin_threads: false,
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared by the pool owner, every handle, and every worker.
///
/// # Invariants
///
/// - `queues.len() == unparkers.len() == states.len()`
/// - `shutdown` is monotonic: once set, never cleared
/// - `awake` counts workers not parked and not exited
/// - `fault` keeps only the first captured panic
pub(crate) struct Shared {
    pub(crate) pool_id: usize,
    pub(crate) queues: Vec<WorkQueue>,
    unparkers: Vec<Unparker>,
    states: Vec<CachePadded<AtomicU8>>,
    shutdown: AtomicBool,
    pub(crate) awake: CachePadded<AtomicUsize>,
    exited: AtomicUsize,
    next_target: AtomicUsize,
    next_victim: AtomicUsize,
    fault: Mutex<Option<PanicPayload>>,
    pub(crate) park_timeout: Duration,
}

impl Shared {
    #[inline]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_state(&self, worker_id: usize, state: WorkerState) {
        self.states[worker_id].store(state as u8, Ordering::Release);
    }

    #[inline]
    fn state(&self, worker_id: usize) -> WorkerState {
        WorkerState::from_u8(self.states[worker_id].load(Ordering::Acquire))
    }

    pub(crate) fn has_stealable_work(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    /// Wake the owner of `target` after a push, plus one parked peer when
    /// the owner cannot take the task right away (it is running something,
    /// or it is the submitting thread).
    ///
    /// Pairs with the fence in `Worker::park`: either this scan sees the
    /// peer `Parked`, or the peer's recheck sees the pushed task.
    fn wake_for_push(&self, target: usize) {
        if current_worker_in(self.pool_id) != Some(target) {
            self.unparkers[target].unpark();
        }

        fence(Ordering::SeqCst);
        let n = self.queues.len();
        if self.state(target) == WorkerState::Parked || self.awake.load(Ordering::Acquire) == n {
            return;
        }
        for offset in 1..n {
            let peer = (target + offset) % n;
            if self.state(peer) == WorkerState::Parked {
                self.unparkers[peer].unpark();
                break;
            }
        }
    }

    fn unpark_all(&self) {
        for u in &self.unparkers {
            u.unpark();
        }
    }

    pub(crate) fn send_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            tracing::debug!(pool = self.pool_id, "shutdown requested");
        }
        self.unpark_all();
    }

    /// Record the first task panic and shut the pool down.
    pub(crate) fn record_fault(&self, payload: PanicPayload) {
        {
            let mut guard = lock_or_recover(&self.fault);
            if guard.is_none() {
                *guard = Some(payload);
            }
        }
        self.send_shutdown();
    }

    pub(crate) fn worker_exited(&self) {
        self.exited.fetch_add(1, Ordering::AcqRel);
    }

    fn add_work(&self, task: Task) -> Result<(), SubmitError> {
        if self.is_shutdown() {
            return Err(SubmitError::ShutDown(task));
        }

        let n = self.queues.len();
        let start = match current_worker_in(self.pool_id) {
            Some(own) => own,
            None => self.next_target.fetch_add(1, Ordering::Relaxed) % n,
        };

        let mut task = task;
        let mut saw_full = false;
        for offset in 0..n {
            let target = (start + offset) % n;
            match self.queues[target].push(task) {
                Ok(()) => {
                    self.wake_for_push(target);
                    return Ok(());
                }
                Err(PushError::Full(t)) => {
                    saw_full = true;
                    task = t;
                }
                Err(PushError::Closed(t)) => task = t,
            }
        }

        if saw_full && !self.is_shutdown() {
            Err(SubmitError::Full(task))
        } else {
            Err(SubmitError::ShutDown(task))
        }
    }

    fn steal_some_work(&self) -> Option<Task> {
        let n = self.queues.len();
        let start = self.next_victim.fetch_add(1, Ordering::Relaxed) % n;
        (0..n).find_map(|offset| self.queues[(start + offset) % n].steal())
    }
}

/// Lock with poison recovery; used on teardown paths that must not panic.
fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

// ============================================================================
// PoolHandle (explicit pool reference for workers and producers)
// ============================================================================

/// Cloneable handle to a running pool.
///
/// Every worker receives one at construction; producers on any thread can
/// hold one. `Clone + Send + Sync`.
#[derive(Clone)]
pub struct PoolHandle {
    pub(crate) shared: Arc<Shared>,
}

impl PoolHandle {
    /// Submit a task; returns an observer handle on success.
    ///
    /// # Errors
    ///
    /// `ShutDown(task)` after `send_shutdown`, `Full(task)` when every queue
    /// is at capacity. The task is handed back in both cases.
    pub fn submit(&self, task: Task) -> Result<TaskHandle, SubmitError> {
        let handle = task.handle();
        self.shared.add_work(task)?;
        Ok(handle)
    }

    /// Enqueue a task without creating a handle.
    #[inline]
    pub fn add_work(&self, task: Task) -> Result<(), SubmitError> {
        self.shared.add_work(task)
    }

    /// Stop accepting work and wake every worker so they drain and exit.
    pub fn send_shutdown(&self) {
        self.shared.send_shutdown();
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Steal one queued task from any worker (front of the queue).
    ///
    /// Used by threads that want to help instead of blocking, such as
    /// [`CompletionBarrier::join`](super::barrier::CompletionBarrier::join).
    pub fn steal_some_work(&self) -> Option<Task> {
        self.shared.steal_some_work()
    }

    /// Lock-free probe: does any queue look non-empty?
    #[inline]
    pub fn has_stealable_work(&self) -> bool {
        self.shared.has_stealable_work()
    }

    /// Run a task on the calling thread, escalating a panic exactly like a
    /// worker would: the pool shuts down and the payload resurfaces from
    /// [`WorkerPool::wait_for_workers_to_complete`].
    ///
    /// Use this for work the pool refused or work stolen by a helper.
    pub fn run_inline(&self, task: Task) {
        let id = task.id();
        if let Err(payload) = task.run() {
            tracing::warn!(task = %id, "task panicked on calling thread; shutting down pool");
            self.shared.record_fault(payload);
        }
    }

    /// Workers currently not parked.
    #[inline]
    pub fn awake_workers(&self) -> usize {
        self.shared.awake.load(Ordering::Acquire)
    }

    /// Workers that have left their loop.
    #[inline]
    pub fn exited_workers(&self) -> usize {
        self.shared.exited.load(Ordering::Acquire)
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Snapshot of one worker's state.
    ///
    /// # Panics
    ///
    /// Panics if `worker_id >= worker_count()`.
    pub fn worker_state(&self, worker_id: usize) -> WorkerState {
        self.shared.state(worker_id)
    }

    /// Snapshot of one worker's queue length.
    pub fn queue_len(&self, worker_id: usize) -> usize {
        self.shared.queues[worker_id].len()
    }

    /// True when the current thread is one of this pool's workers.
    pub fn is_worker_thread(&self) -> bool {
        current_worker_in(self.shared.pool_id).is_some()
    }
}

impl AsRef<PoolHandle> for PoolHandle {
    fn as_ref(&self) -> &PoolHandle {
        self
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("pool_id", &self.shared.pool_id)
            .field("workers", &self.shared.queues.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ============================================================================
// WorkerPool
// ============================================================================

/// Owner of the worker threads.
///
/// # Lifecycle
///
/// 1. `WorkerPool::new(config)` spawns every worker; they park until work
///    arrives.
/// 2. `submit` / `handle().submit` from any thread.
/// 3. `send_shutdown()` then `wait_for_workers_to_complete()`.
///
/// # Example
///
/// ```
/// use workgraph::{PoolConfig, Task, WorkerPool};
///
/// let pool = WorkerPool::new(PoolConfig::with_workers(2)).unwrap();
/// let handle = pool.submit(Task::new(|| {})).unwrap();
/// pool.send_shutdown();
/// pool.wait_for_workers_to_complete().unwrap();
/// assert!(handle.is_released());
/// ```
pub struct WorkerPool {
    handle: PoolHandle,
    threads: Mutex<Vec<JoinHandle<WorkerMetricsLocal>>>,
}

impl WorkerPool {
    /// Create and start the pool.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a bad config; `Spawn` if the OS refuses a thread
    /// (already-started workers are shut down and joined first).
    pub fn new(cfg: PoolConfig) -> Result<Self, PoolError> {
        cfg.validate()?;

        let n = cfg.workers;
        let pool_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);

        let mut parkers = Vec::with_capacity(n);
        let mut unparkers = Vec::with_capacity(n);
        for _ in 0..n {
            let p = Parker::new();
            unparkers.push(p.unparker().clone());
            parkers.push(p);
        }

        let shared = Arc::new(Shared {
            pool_id,
            queues: (0..n).map(|_| WorkQueue::new(cfg.queue_capacity)).collect(),
            unparkers,
            states: (0..n)
                .map(|_| CachePadded::new(AtomicU8::new(WorkerState::Stealing as u8)))
                .collect(),
            shutdown: AtomicBool::new(false),
            awake: CachePadded::new(AtomicUsize::new(n)),
            exited: AtomicUsize::new(0),
            next_target: AtomicUsize::new(0),
            next_victim: AtomicUsize::new(0),
            fault: Mutex::new(None),
            park_timeout: cfg.park_timeout,
        });

        let pool = Self {
            handle: PoolHandle {
                shared: Arc::clone(&shared),
            },
            threads: Mutex::new(Vec::with_capacity(n)),
        };

        for (worker_id, parker) in parkers.into_iter().enumerate() {
            let worker = Worker::new(worker_id, pool.handle.clone(), parker);
            let pin = cfg.pin_threads;

            let mut builder =
                thread::Builder::new().name(format!("{}-{worker_id}", cfg.thread_name_prefix));
            if let Some(stack_size) = cfg.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || {
                if pin {
                    pin_current_thread(worker_id);
                }
                worker.run()
            });

            match spawned {
                Ok(th) => lock_or_recover(&pool.threads).push(th),
                Err(e) => {
                    // Dropping `pool` shuts down and joins whatever started.
                    tracing::warn!(pool = pool_id, worker = worker_id, error = %e, "worker spawn failed");
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        tracing::debug!(
            pool = pool_id,
            workers = n,
            queue_capacity = cfg.queue_capacity,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Handle for producers on other threads.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// See [`PoolHandle::submit`].
    pub fn submit(&self, task: Task) -> Result<TaskHandle, SubmitError> {
        self.handle.submit(task)
    }

    /// See [`PoolHandle::add_work`].
    pub fn add_work(&self, task: Task) -> Result<(), SubmitError> {
        self.handle.add_work(task)
    }

    /// Stop accepting work and wake all workers. Idempotent.
    pub fn send_shutdown(&self) {
        self.handle.send_shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.handle.is_shutdown()
    }

    pub fn worker_count(&self) -> usize {
        self.handle.worker_count()
    }

    pub fn awake_workers(&self) -> usize {
        self.handle.awake_workers()
    }

    pub fn worker_state(&self, worker_id: usize) -> WorkerState {
        self.handle.worker_state(worker_id)
    }

    /// Block until every worker has drained its queue and exited.
    ///
    /// Returns merged worker metrics. A second call (or a call after all
    /// workers exited) returns an empty snapshot without blocking.
    ///
    /// # Errors
    ///
    /// `NotShutDown` if `send_shutdown` was never called (the workers would
    /// never exit).
    ///
    /// # Panics
    ///
    /// If a task body panicked, the first panic is re-raised here.
    pub fn wait_for_workers_to_complete(&self) -> Result<MetricsSnapshot, PoolError> {
        if !self.is_shutdown() {
            return Err(PoolError::NotShutDown);
        }

        let snapshot = self.join_workers();

        let fault = lock_or_recover(&self.handle.shared.fault).take();
        if let Some(payload) = fault {
            std::panic::resume_unwind(payload);
        }

        Ok(snapshot)
    }

    /// Join every worker thread still owned by the pool.
    ///
    /// The thread list stays locked for the whole join, so concurrent
    /// callers block until the first one finishes.
    fn join_workers(&self) -> MetricsSnapshot {
        let mut threads = lock_or_recover(&self.threads);
        let mut snapshot = MetricsSnapshot::default();

        for th in threads.drain(..) {
            let m = th.join().unwrap_or_else(|p| {
                self.handle.shared.record_fault(p);
                WorkerMetricsLocal::default()
            });
            snapshot.merge_worker(&m);
        }

        if snapshot.worker_count() > 0 {
            tracing::debug!(
                pool = self.handle.shared.pool_id,
                tasks_executed = snapshot.tasks_executed,
                steals = snapshot.steal_successes,
                "worker pool drained"
            );
        }
        snapshot
    }
}

impl AsRef<PoolHandle> for WorkerPool {
    fn as_ref(&self) -> &PoolHandle {
        &self.handle
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if lock_or_recover(&self.threads).is_empty() {
            return;
        }
        self.send_shutdown();
        let _ = self.join_workers();

        if lock_or_recover(&self.handle.shared.fault).take().is_some() {
            tracing::warn!(
                pool = self.handle.shared.pool_id,
                "worker pool dropped with an unreported task panic"
            );
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "scheduler-affinity")]
fn pin_current_thread(worker_id: usize) {
    let cores = match core_affinity::get_core_ids() {
        Some(v) if !v.is_empty() => v,
        _ => {
            tracing::warn!(worker = worker_id, "failed to get core ids, skipping affinity");
            return;
        }
    };
    let core = cores[worker_id % cores.len()];
    if !core_affinity::set_for_current(core) {
        tracing::warn!(worker = worker_id, core = core.id, "failed to pin worker");
    }
}

#[cfg(not(feature = "scheduler-affinity"))]
fn pin_current_thread(worker_id: usize) {
    tracing::warn!(
        worker = worker_id,
        "pin_threads requested without the scheduler-affinity feature"
    );
}

// ============================================================================
// Tests
// ============================================================================
