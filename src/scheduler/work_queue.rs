//! Bounded per-worker double-ended task queue.
//!
//! # Layout
//!
//! ```text
//!            steal() (thieves, FIFO)            push()/pop_own() (owner, LIFO)
//!                  │                                      │
//!                  ▼                                      ▼
//!            ┌──────┬──────┬──────┬──────┬──────┬──────┐
//!            │ old  │      │      │      │      │ new  │
//!            └──────┴──────┴──────┴──────┴──────┴──────┘
//!             front                                 back
//! ```
//!
//! # Correctness Invariants
//!
//! - Both ends are served under the same lock, so the last remaining task is
//!   observed by exactly one of `pop_own` / `steal`. A thief that loses that
//!   race sees an empty queue.
//! - `len <= capacity` at all times; `push` past capacity hands the task back.
//! - Once closed (owner exited), no push succeeds. Closing only happens
//!   while empty, so a closed queue never strands a task.
//! - The `len` mirror is written only under the lock and read without it,
//!   giving a cheap (possibly stale) "is there work" probe for idle paths.
//!
//! The lock races are model-checked with loom:
//! `RUSTFLAGS="--cfg loom" cargo test --release --lib loom_tests`.

use std::collections::VecDeque;

use crossbeam_utils::CachePadded;

use super::error::PushError;
use super::sync::{AtomicUsize, Mutex, MutexGuard, Ordering};
use super::task::Task;

#[derive(Debug)]
struct Slots {
    tasks: VecDeque<Task>,
    closed: bool,
}

/// Fixed-capacity deque owned by one worker.
#[derive(Debug)]
pub struct WorkQueue {
    slots: Mutex<Slots>,
    len: CachePadded<AtomicUsize>,
    capacity: usize,
}

impl WorkQueue {
    /// Create an empty queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "WorkQueue capacity must be > 0");
        Self {
            slots: Mutex::new(Slots {
                tasks: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            len: CachePadded::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Lock with poison recovery.
    ///
    /// Task bodies never run under this lock, so poisoning can only come
    /// from a watcher dropped mid-push; the deque itself is still coherent.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, Slots> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    #[inline]
    fn publish_len(&self, slots: &Slots) {
        self.len.store(slots.tasks.len(), Ordering::Release);
    }

    /// Push onto the owner end.
    ///
    /// # Errors
    ///
    /// `Full(task)` at capacity, `Closed(task)` after the owner exited.
    pub fn push(&self, task: Task) -> Result<(), PushError> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(PushError::Closed(task));
        }
        if slots.tasks.len() >= self.capacity {
            return Err(PushError::Full(task));
        }
        slots.tasks.push_back(task);
        self.publish_len(&slots);
        Ok(())
    }

    /// Pop the newest task (owner end, LIFO).
    pub fn pop_own(&self) -> Option<Task> {
        let mut slots = self.lock();
        let task = slots.tasks.pop_back();
        if task.is_some() {
            self.publish_len(&slots);
        }
        task
    }

    /// Steal the oldest task (thief end, FIFO).
    ///
    /// Cheap unlocked probe first so idle thieves do not hammer the lock of
    /// an empty queue.
    pub fn steal(&self) -> Option<Task> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut slots = self.lock();
        let task = slots.tasks.pop_front();
        if task.is_some() {
            self.publish_len(&slots);
        }
        task
    }

    /// Close the queue if it is empty. Returns true when closed.
    ///
    /// Called by the owner on its way out during shutdown; a concurrent
    /// push either lands first (and the close fails) or is rejected.
    pub fn close_if_empty(&self) -> bool {
        let mut slots = self.lock();
        if slots.tasks.is_empty() {
            slots.closed = true;
        }
        slots.closed
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Snapshot of the number of queued tasks (may be stale).
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}


#[cfg(loom)]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn last_element_goes_to_exactly_one_side() {
        loom::model(|| {
            let q = Arc::new(WorkQueue::new(2));
            q.push(Task::new(|| {})).unwrap();

            let thief_q = Arc::clone(&q);
            let thief = thread::spawn(move || thief_q.steal().map(|t| t.id()));

            let own = q.pop_own().map(|t| t.id());
            let stolen = thief.join().unwrap();

            assert!(own.is_some() ^ stolen.is_some());
            assert!(q.is_empty());
        });
    }

    #[test]
    fn close_races_with_push() {
        loom::model(|| {
            let q = Arc::new(WorkQueue::new(2));

            let pusher_q = Arc::clone(&q);
            let pusher = thread::spawn(move || pusher_q.push(Task::new(|| {})).is_ok());

            let closed = q.close_if_empty();
            let pushed = pusher.join().unwrap();

            // Either the push landed before the close (close fails), or
            // the close won and the push was rejected.
            assert!(pushed ^ closed);
        });
    }
}
