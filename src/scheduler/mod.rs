//! Work-stealing scheduler: pool, barrier, and per-frame task graph.
//!
//! # Architecture
//!
//! Three layers, each usable on its own:
//! - **Pool**: fixed worker threads, one bounded queue each, stealing
//! - **Barrier**: countdown over tracked tasks with completion callbacks
//! - **Graph**: DAG of named tasks, dependents released as edges resolve
//!
//! Everything is reached through an explicit [`WorkerPool`] or
//! [`PoolHandle`]; there is no process-global pool.

pub mod barrier;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod task;
pub mod task_graph;
pub mod work_queue;
pub mod worker;
pub mod worker_id;

mod sync;

pub use barrier::CompletionBarrier;
pub use error::{BarrierError, GraphError, PoolError, PushError, SubmitError};
pub use metrics::{MetricsSnapshot, WorkerMetricsLocal};
pub use pool::{PoolConfig, PoolHandle, WorkerPool, DEFAULT_QUEUE_CAPACITY};
pub use task::{PanicPayload, Task, TaskHandle, TaskId, TaskOutcome, TaskState};
pub use task_graph::{GraphReport, NodeId, TaskGraph, TaskOutput};
pub use work_queue::WorkQueue;
pub use worker::WorkerState;
