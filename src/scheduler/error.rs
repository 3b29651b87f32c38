//! Error types for queues, pools, barriers, and task graphs.
//!
//! Rejections that hand work back (`PushError`, `SubmitError`) carry the
//! task so the caller can retry, reroute, or run it inline.

use thiserror::Error;

use super::task::Task;
use super::task_graph::NodeId;

/// Queue-level rejection.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("work queue is full")]
    Full(Task),
    #[error("work queue is closed")]
    Closed(Task),
}

impl PushError {
    /// Recover the rejected task.
    pub fn into_task(self) -> Task {
        match self {
            PushError::Full(t) | PushError::Closed(t) => t,
        }
    }
}

/// Pool-level rejection from `submit` / `add_work`.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Every worker queue is at capacity.
    #[error("every worker queue is full")]
    Full(Task),
    /// `send_shutdown` has been called.
    #[error("worker pool is shutting down")]
    ShutDown(Task),
}

impl SubmitError {
    /// Recover the rejected task.
    pub fn into_task(self) -> Task {
        match self {
            SubmitError::Full(t) | SubmitError::ShutDown(t) => t,
        }
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, SubmitError::ShutDown(_))
    }
}

/// Pool construction and teardown errors.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
    #[error("wait_for_workers_to_complete called before send_shutdown")]
    NotShutDown,
}

/// Barrier wait outcome when tracked work did not complete cleanly.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("{0} dependent task(s) faulted or were released unrun")]
    DependentFaulted(usize),
}

/// Task graph construction and execution errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown task {0:?}")]
    UnknownTask(NodeId),
    #[error("dependency {from:?} -> {to:?} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },
    #[error("worker pool is shut down")]
    PoolShutDown,
    #[error("task `{name}` faulted; {skipped} dependent task(s) skipped")]
    TaskFaulted { name: &'static str, skipped: usize },
}
