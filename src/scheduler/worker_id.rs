//! Thread-local worker identity for local-first submission.
//!
//! # Purpose
//!
//! A task that submits follow-up work (graph successors, fan-out) should
//! land on the queue of the worker that is running it: the data it just
//! touched is hot in that core's cache. Worker threads record which pool
//! and slot they serve; `submit` checks it in O(1).
//!
//! # Correctness Invariant
//!
//! `current_worker()` returns `Some` **only** on a live worker thread, and
//! the pool id distinguishes independent pools running in one process.
//! Any other thread (main, tests, foreign pools) sees `None` or a foreign
//! pool id.

use std::cell::Cell;

/// Identity of the worker slot the current thread serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkerSlot {
    pub pool_id: usize,
    pub worker_id: usize,
}

thread_local! {
    static CURRENT: Cell<Option<WorkerSlot>> = const { Cell::new(None) };
}

/// Set (or clear) the worker identity of this thread.
///
/// Workers call this once at startup and with `None` before exit.
#[inline]
pub fn set_current_worker(slot: Option<WorkerSlot>) {
    CURRENT.with(|c| c.set(slot));
}

/// Identity of the current thread, if it is a pool worker.
#[inline]
pub fn current_worker() -> Option<WorkerSlot> {
    CURRENT.with(Cell::get)
}

/// Worker id on `pool_id`, if the current thread is one of its workers.
#[inline]
pub fn current_worker_in(pool_id: usize) -> Option<usize> {
    current_worker()
        .filter(|slot| slot.pool_id == pool_id)
        .map(|slot| slot.worker_id)
}
