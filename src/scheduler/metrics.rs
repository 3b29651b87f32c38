//! # Metrics Module
//!
//! Per-worker counters, merged once at teardown.
//!
//! ## Design
//!
//! - **Per-worker local metrics**: hot path updates are plain integer ops
//!   owned by the worker thread (no atomics).
//! - **Cache-line aligned**: each worker's counters live on their own line.
//! - **Post-run aggregation**: workers return their counters from the thread
//!   closure; `wait_for_workers_to_complete` merges them.

/// Counters owned by one worker thread.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[repr(align(64))]
pub struct WorkerMetricsLocal {
    /// Tasks this worker ran (own + stolen).
    pub tasks_executed: u64,
    /// Tasks taken from the worker's own queue.
    pub local_pops: u64,
    /// Tasks taken from a peer's queue.
    pub steal_successes: u64,
    /// Peer queues probed.
    pub steal_attempts: u64,
    /// Times the worker parked.
    pub park_count: u64,
    /// Task bodies that panicked on this worker.
    pub faults: u64,
}

const _: () = assert!(std::mem::align_of::<WorkerMetricsLocal>() >= 64);

impl WorkerMetricsLocal {
    #[inline(always)]
    pub(crate) fn bump(counter: &mut u64) {
        *counter = counter.saturating_add(1);
    }
}

/// Aggregated metrics across all workers of a pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_executed: u64,
    pub local_pops: u64,
    pub steal_successes: u64,
    pub steal_attempts: u64,
    pub park_count: u64,
    pub faults: u64,
    /// Tasks executed by each worker, indexed by worker id.
    pub per_worker_executed: Vec<u64>,
}

impl MetricsSnapshot {
    /// Merge one worker's counters. Call once per worker, in worker-id order.
    pub fn merge_worker(&mut self, w: &WorkerMetricsLocal) {
        self.tasks_executed = self.tasks_executed.wrapping_add(w.tasks_executed);
        self.local_pops = self.local_pops.wrapping_add(w.local_pops);
        self.steal_successes = self.steal_successes.wrapping_add(w.steal_successes);
        self.steal_attempts = self.steal_attempts.wrapping_add(w.steal_attempts);
        self.park_count = self.park_count.wrapping_add(w.park_count);
        self.faults = self.faults.wrapping_add(w.faults);
        self.per_worker_executed.push(w.tasks_executed);
    }

    /// Number of workers merged.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.per_worker_executed.len()
    }

    /// Fraction of steal probes that found work, or `None` without probes.
    pub fn steal_success_rate(&self) -> Option<f64> {
        if self.steal_attempts == 0 {
            return None;
        }
        Some(self.steal_successes as f64 / self.steal_attempts as f64)
    }
}
