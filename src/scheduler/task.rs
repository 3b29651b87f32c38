//! Task: the one-shot unit of work moved through worker queues.
//!
//! # Lifecycle
//!
//! ```text
//!   Submitted ──run()──► Running ──body ok──► Completed ──watchers──► Released
//!       │                   │
//!       │                   └──body panicked──► Faulted ──watchers──► Released
//!       │
//!       └──dropped unrun──► Skipped ──watchers──► Released
//! ```
//!
//! # Correctness Invariants
//!
//! - **Single consumer**: a `Task` is not `Clone`; whoever holds it by value
//!   is its only consumer. The shared lifecycle cell additionally rejects a
//!   second `Submitted -> Running` transition.
//! - **Watchers fire exactly once**: every path out of `Submitted` (run,
//!   fault, drop) drains the watcher list once, in subscription order.
//! - **No leaks**: dropping a task that never ran releases it as `Skipped`,
//!   so barriers tracking it still count down.
//!
//! The scheduler never looks inside the body; it only calls [`Task::run`].

use std::any::Any;
use std::fmt;
use std::num::NonZeroU64;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Panic payload captured from a task body.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

type Body = Box<dyn FnOnce() + Send + 'static>;
type Watcher = Box<dyn FnOnce(TaskOutcome) + Send + 'static>;

/// Process-unique task identifier.
///
/// Ids are handed out from a global counter and never reused.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        match NonZeroU64::new(id) {
            Some(id) => Self(id),
            None => Self::exhausted(),
        }
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique task id: bitspace exhausted")
    }

    /// Raw numeric value.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Observable lifecycle state of a task.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created and waiting in a queue (or in the submitter's hands).
    Submitted = 0,
    /// Body is executing on some thread.
    Running = 1,
    /// Body returned normally; watchers are being notified.
    Completed = 2,
    /// Body panicked; watchers are being notified.
    Faulted = 3,
    /// Dropped without running; watchers are being notified.
    Skipped = 4,
    /// Terminal: watchers have run and the task is gone.
    Released = 5,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Submitted,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Faulted,
            4 => TaskState::Skipped,
            5 => TaskState::Released,
            _ => unreachable!("invalid task state {v}"),
        }
    }
}

/// What a watcher learns about the task it subscribed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    /// The body ran to completion.
    Completed,
    /// The body panicked.
    Faulted,
    /// The task was released without running.
    Skipped,
}

impl TaskOutcome {
    /// True unless the body ran and returned normally.
    #[inline]
    pub fn is_failure(self) -> bool {
        !matches!(self, TaskOutcome::Completed)
    }

    fn state(self) -> TaskState {
        match self {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Faulted => TaskState::Faulted,
            TaskOutcome::Skipped => TaskState::Skipped,
        }
    }
}

/// Lifecycle cell shared between a task and its handles.
#[derive(Debug)]
struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    fn load(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn store(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Leave `Submitted`. Any other starting state means the task escaped
    /// the single-consumer rule.
    fn leave_submitted(&self, id: TaskId, next: TaskState) {
        let res = self.state.compare_exchange(
            TaskState::Submitted as u8,
            next as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if let Err(actual) = res {
            panic!(
                "task {id} consumed twice: expected Submitted, found {:?}",
                TaskState::from_u8(actual)
            );
        }
    }
}

/// A schedulable, one-shot unit of work.
///
/// Build with [`Task::new`] or [`Task::named`], attach watchers with
/// [`Task::subscribe`], then hand it to a pool. Watchers run on the thread
/// that finishes the task, after the body and before release.
pub struct Task {
    id: TaskId,
    name: Option<&'static str>,
    body: Option<Body>,
    watchers: Vec<Watcher>,
    lifecycle: Arc<Lifecycle>,
}

impl Task {
    /// Create an anonymous task.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: TaskId::next(),
            name: None,
            body: Some(Box::new(body)),
            watchers: Vec::new(),
            lifecycle: Arc::new(Lifecycle {
                state: AtomicU8::new(TaskState::Submitted as u8),
            }),
        }
    }

    /// Create a task carrying a debug name (shown in traces and errors).
    pub fn named<F>(name: &'static str, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = Self::new(body);
        task.name = Some(name);
        task
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.lifecycle.load()
    }

    /// Observer handle that outlives the task.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            name: self.name,
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Register a watcher notified once when the task leaves `Submitted`
    /// for good (completed, faulted, or dropped unrun).
    ///
    /// Watchers run in subscription order on the finishing thread.
    pub fn subscribe<F>(&mut self, watcher: F)
    where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        self.watchers.push(Box::new(watcher));
    }

    /// Number of attached watchers.
    #[inline]
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Run the body on the current thread, notify watchers, release.
    ///
    /// A panicking body is caught: watchers observe
    /// [`TaskOutcome::Faulted`] and the payload is returned so the caller
    /// can escalate it.
    pub fn run(mut self) -> Result<(), PanicPayload> {
        let body = self
            .body
            .take()
            .expect("task body missing before run (single-consumer invariant)");

        self.lifecycle.leave_submitted(self.id, TaskState::Running);
        tracing::trace!(task = %self.id, name = self.name.unwrap_or(""), "task running");

        let res = panic::catch_unwind(AssertUnwindSafe(body));
        let outcome = match res {
            Ok(()) => TaskOutcome::Completed,
            Err(_) => TaskOutcome::Faulted,
        };

        self.finish(outcome);
        res
    }

    fn finish(&mut self, outcome: TaskOutcome) {
        self.lifecycle.store(outcome.state());
        for watcher in self.watchers.drain(..) {
            watcher(outcome);
        }
        self.lifecycle.store(TaskState::Released);
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // Body still present: the task never ran.
        if self.body.take().is_some() {
            self.lifecycle.leave_submitted(self.id, TaskState::Skipped);
            tracing::trace!(task = %self.id, name = self.name.unwrap_or(""), "task released unrun");
            self.finish(TaskOutcome::Skipped);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

/// Read-only view of a task's lifecycle, returned by `submit`.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: TaskId,
    name: Option<&'static str>,
    lifecycle: Arc<Lifecycle>,
}

impl TaskHandle {
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.lifecycle.load()
    }

    /// True once the task is gone and all its watchers have run.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.state() == TaskState::Released
    }
}
