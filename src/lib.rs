//! Work-stealing job scheduler for frame-driven workloads.
//!
//! ## Scope
//! A fixed pool of worker threads runs small one-shot [`Task`]s. Each worker
//! owns a bounded queue; idle workers steal from peers. On top of the pool,
//! a [`CompletionBarrier`] waits for a set of tasks, and a [`TaskGraph`]
//! runs a per-frame DAG of tasks in dependency order.
//!
//! ## Key invariants
//! - Every accepted task runs exactly once and is released exactly once.
//! - Shutdown stops new submissions, then drains work already accepted.
//! - A task never runs before all of its graph predecessors finished.
//! - A panicking task body shuts the pool down; the panic resurfaces from
//!   [`WorkerPool::wait_for_workers_to_complete`].
//!
//! ## Frame loop
//! ```text
//! build TaskGraph -> execute(&pool) -> (caller steals while joined) -> next frame
//! ```
//!
//! ## Notable entry points
//! - [`WorkerPool`] / [`PoolConfig`] / [`PoolHandle`]: threads and submission.
//! - [`CompletionBarrier`]: `add_dependent_work`, `wait`, `join`.
//! - [`TaskGraph`]: `add`, `add_after`, `add_with_output`, `execute`.

pub mod scheduler;

pub use scheduler::{
    BarrierError, CompletionBarrier, GraphError, GraphReport, MetricsSnapshot, NodeId, PoolConfig,
    PoolError, PoolHandle, PushError, SubmitError, Task, TaskGraph, TaskHandle, TaskId,
    TaskOutcome, TaskOutput, TaskState, WorkQueue, WorkerPool, WorkerState,
};
