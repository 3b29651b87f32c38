//! Worker loop: drain own queue, steal in rotation, park when idle.
//!
//! # Algorithm
//!
//! ```text
//!              ┌──────────────────────────┐
//!              │ 1. Draining              │ ◄── pop_own() until empty (LIFO)
//!              └────────────┬─────────────┘
//!                           ▼
//!              ┌──────────────────────────┐
//!              │ 2. Stealing              │ ◄── peers id+1, id+2, ... (FIFO end)
//!              └────────────┬─────────────┘
//!                 found │        │ nothing
//!            run, loop ◄┘        ▼
//!              ┌──────────────────────────┐   yes   ┌─────────────────────┐
//!              │ shutdown requested?      ├────────►│ close own queue if  │
//!              └────────────┬─────────────┘         │ empty, then exit    │
//!                        no │                       └─────────────────────┘
//!                           ▼
//!              ┌──────────────────────────┐
//!              │ 3. Parked                │ ◄── Parker, woken by push/shutdown
//!              └──────────────────────────┘
//! ```
//!
//! The fixed rotation starting just after the worker's own slot spreads
//! thieves over different victims so no single peer is hammered.

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crossbeam_utils::sync::Parker;

use super::metrics::WorkerMetricsLocal;
use super::pool::PoolHandle;
use super::task::Task;
use super::worker_id::{set_current_worker, WorkerSlot};

/// What a worker is doing right now.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Sleeping until new work or shutdown.
    Parked = 0,
    /// Running tasks from its own queue.
    Draining = 1,
    /// Probing peers for work (also the state right after start).
    Stealing = 2,
    /// Left the loop; its queue is closed.
    Shutdown = 3,
}

impl WorkerState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Parked,
            1 => WorkerState::Draining,
            2 => WorkerState::Stealing,
            3 => WorkerState::Shutdown,
            _ => unreachable!("invalid worker state {v}"),
        }
    }
}

/// Execution context bound to one queue of a pool.
pub(crate) struct Worker {
    id: usize,
    pool: PoolHandle,
    parker: Parker,
    metrics: WorkerMetricsLocal,
}

impl Worker {
    pub(crate) fn new(id: usize, pool: PoolHandle, parker: Parker) -> Self {
        Self {
            id,
            pool,
            parker,
            metrics: WorkerMetricsLocal::default(),
        }
    }

    /// Thread entry point. Returns the worker's counters on exit.
    pub(crate) fn run(mut self) -> WorkerMetricsLocal {
        let shared = Arc::clone(&self.pool.shared);
        let _span = tracing::debug_span!("worker", pool = shared.pool_id, id = self.id).entered();

        set_current_worker(Some(WorkerSlot {
            pool_id: shared.pool_id,
            worker_id: self.id,
        }));
        tracing::trace!("worker started");

        loop {
            self.drain_own();

            shared.set_state(self.id, WorkerState::Stealing);
            if let Some(task) = self.steal_rotation() {
                WorkerMetricsLocal::bump(&mut self.metrics.steal_successes);
                self.execute(task);
                continue;
            }

            if shared.is_shutdown() {
                if shared.queues[self.id].close_if_empty() {
                    break;
                }
                continue;
            }

            self.park();
        }

        shared.set_state(self.id, WorkerState::Shutdown);
        shared.awake.fetch_sub(1, Ordering::AcqRel);
        shared.worker_exited();
        set_current_worker(None);

        tracing::debug!(
            tasks_executed = self.metrics.tasks_executed,
            steals = self.metrics.steal_successes,
            parks = self.metrics.park_count,
            "worker exited"
        );
        self.metrics
    }

    fn drain_own(&mut self) {
        let shared = Arc::clone(&self.pool.shared);
        shared.set_state(self.id, WorkerState::Draining);
        while let Some(task) = shared.queues[self.id].pop_own() {
            WorkerMetricsLocal::bump(&mut self.metrics.local_pops);
            self.execute(task);
        }
    }

    /// One pass over every peer, starting just after ourselves.
    fn steal_rotation(&mut self) -> Option<Task> {
        let queues = &self.pool.shared.queues;
        let n = queues.len();
        for offset in 1..n {
            let victim = (self.id + offset) % n;
            WorkerMetricsLocal::bump(&mut self.metrics.steal_attempts);
            if let Some(task) = queues[victim].steal() {
                tracing::trace!(victim, "stole task");
                return Some(task);
            }
        }
        None
    }

    fn execute(&mut self, task: Task) {
        WorkerMetricsLocal::bump(&mut self.metrics.tasks_executed);
        let id = task.id();
        let name = task.name();

        if let Err(payload) = task.run() {
            WorkerMetricsLocal::bump(&mut self.metrics.faults);
            tracing::warn!(
                task = %id,
                name = name.unwrap_or(""),
                "task panicked; shutting down pool"
            );
            self.pool.shared.record_fault(payload);
        }
    }

    /// Advertise `Parked`, re-check for work, then sleep.
    ///
    /// A producer that pushed before seeing `Parked` has already unparked
    /// us; the Parker keeps that token, so the park below returns at once.
    fn park(&mut self) {
        let shared = &self.pool.shared;
        shared.set_state(self.id, WorkerState::Parked);
        shared.awake.fetch_sub(1, Ordering::AcqRel);
        // Pairs with the fence in `wake_for_push`.
        fence(Ordering::SeqCst);

        if !shared.has_stealable_work() && !shared.is_shutdown() {
            WorkerMetricsLocal::bump(&mut self.metrics.park_count);
            self.parker.park_timeout(shared.park_timeout);
        }

        shared.awake.fetch_add(1, Ordering::AcqRel);
        shared.set_state(self.id, WorkerState::Stealing);
    }
}
