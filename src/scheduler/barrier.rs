//! Completion barrier: a countdown over tracked tasks plus callbacks.
//!
//! # Protocol
//!
//! ```text
//!   add_dependent_work(&mut task)   pending += 1, subscribe decrement
//!   add_on_completion_event(f)      queue f (runs at once if pending == 0)
//!   ... tasks run anywhere ...      watcher: pending -= 1, notify at 0
//!   wait() / join(pool)             block (or help) until pending == 0,
//!                                   then run queued callbacks once
//! ```
//!
//! # Correctness Invariants
//!
//! - `pending` never underflows: a decrement at zero panics.
//! - Each callback runs at most once, on the thread that observed zero
//!   (the waiter, or the registering thread for late registrations).
//! - Callbacks never run after a tracked task faulted or was skipped; the
//!   next `wait`/`join` reports it and clears the failure count.
//!
//! Notification happens under the callback lock, so a waiter that checked
//! `pending` under that lock cannot miss the final decrement.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crossbeam_utils::{Backoff, CachePadded};

use super::error::BarrierError;
use super::pool::PoolHandle;
use super::task::{Task, TaskOutcome};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    pending: CachePadded<AtomicUsize>,
    failed: AtomicUsize,
    callbacks: Mutex<Vec<Callback>>,
    cv: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Vec<Callback>> {
        match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Watcher body for one tracked task.
    fn dependent_done(&self, outcome: TaskOutcome) {
        if outcome.is_failure() {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }

        let prev = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        let prev = match prev {
            Ok(prev) => prev,
            Err(_) => panic!("completion barrier underflow: more completions than dependents"),
        };

        if prev == 1 {
            let _guard = self.lock();
            self.cv.notify_all();
        }
    }

    /// Run or discard the drained callbacks depending on the failure count.
    fn finish(&self, callbacks: Vec<Callback>) -> Result<(), BarrierError> {
        let failed = self.failed.swap(0, Ordering::AcqRel);
        if failed > 0 {
            tracing::debug!(
                failed,
                discarded = callbacks.len(),
                "barrier dependents failed; dropping completion callbacks"
            );
            return Err(BarrierError::DependentFaulted(failed));
        }
        for cb in callbacks {
            cb();
        }
        Ok(())
    }
}

/// Countdown synchronizer over a set of tasks.
///
/// Cloning yields another handle to the same barrier.
#[derive(Clone)]
pub struct CompletionBarrier {
    inner: Arc<Inner>,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: CachePadded::new(AtomicUsize::new(0)),
                failed: AtomicUsize::new(0),
                callbacks: Mutex::new(Vec::new()),
                cv: Condvar::new(),
            }),
        }
    }

    /// Track `task`: the counter goes up now and down once the task
    /// finishes, faults, or is dropped unrun.
    ///
    /// The decrement is subscribed after any watchers already on the task,
    /// so those have run by the time the barrier releases.
    pub fn add_dependent_work(&self, task: &mut Task) {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        let inner = Arc::clone(&self.inner);
        task.subscribe(move |outcome| inner.dependent_done(outcome));
    }

    /// Queue `callback` to run once every tracked task is done.
    ///
    /// If nothing is pending at registration (and nothing failed), the
    /// callback and any earlier queued ones run right here, in registration
    /// order, on the calling thread.
    pub fn add_on_completion_event<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let ready = {
            let mut guard = self.inner.lock();
            guard.push(Box::new(callback));
            if self.pending() == 0 && self.inner.failed.load(Ordering::Acquire) == 0 {
                mem::take(&mut *guard)
            } else {
                Vec::new()
            }
        };
        for cb in ready {
            cb();
        }
    }

    /// Tracked tasks not yet finished.
    #[inline]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Block until every tracked task is done, then run queued callbacks on
    /// this thread.
    ///
    /// # Errors
    ///
    /// `DependentFaulted(n)` if `n` tracked tasks panicked or were released
    /// unrun since the last wait. Queued callbacks are dropped in that case.
    pub fn wait(&self) -> Result<(), BarrierError> {
        let mut guard = self.inner.lock();
        while self.pending() != 0 {
            guard = match self.inner.cv.wait(guard) {
                Ok(g) => g,
                Err(poison) => poison.into_inner(),
            };
        }
        let callbacks = mem::take(&mut *guard);
        drop(guard);
        self.inner.finish(callbacks)
    }

    /// Like [`wait`](Self::wait), but the calling thread helps: it steals
    /// and runs queued pool work while tracked tasks are outstanding, and
    /// only sleeps once nothing is stealable.
    ///
    /// The barrier lock is never held while stolen work runs, so tracked
    /// tasks finishing on this thread cannot deadlock against it.
    pub fn join(&self, pool: &PoolHandle) -> Result<(), BarrierError> {
        let backoff = Backoff::new();
        let poll = pool.shared.park_timeout;

        while self.pending() != 0 {
            if let Some(task) = pool.steal_some_work() {
                pool.run_inline(task);
                backoff.reset();
                continue;
            }

            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }

            let guard = self.inner.lock();
            if self.pending() != 0 {
                let _ = self.inner.cv.wait_timeout(guard, poll);
            }
        }

        let callbacks = mem::take(&mut *self.inner.lock());
        self.inner.finish(callbacks)
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("pending", &self.pending())
            .field("failed", &self.inner.failed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
