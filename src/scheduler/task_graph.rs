//! Task Graph: per-frame DAG of tasks linked by data dependencies.
//!
//! # Model
//!
//! ```text
//!   load ──► physics ──► render        (edges: "runs after")
//!              ▲
//!   input ─────┘           audio       (no edges: any order)
//! ```
//!
//! A graph is declared up front with [`TaskGraph::add`] /
//! [`TaskGraph::add_after`] / [`TaskGraph::add_dependency`], then consumed
//! by [`TaskGraph::execute`], which returns once every node has finished.
//!
//! # Execution
//!
//! - Every node becomes one [`Task`] tracked by a [`CompletionBarrier`].
//! - Nodes without predecessors are submitted first.
//! - Each completion resolves one edge per successor; a successor is
//!   submitted the moment its last predecessor finishes (from the finishing
//!   thread, so it lands on that worker's queue).
//! - The calling thread drives the run: it steals pool work, runs nodes
//!   the pool refused, and drops nodes skipped after a fault, until the
//!   barrier opens.
//!
//! Releasing a node never runs or drops another task on the releasing
//! thread's stack; refused and skipped nodes go to the caller's worklist.
//! Chain depth therefore never turns into stack depth.
//!
//! # Correctness Invariants
//!
//! - **Acyclic**: edges closing a cycle are rejected at declaration time.
//! - **Edge order**: a node runs strictly after all of its predecessors;
//!   their writes are visible to it.
//! - **Always finishes**: a successor the pool cannot queue (full or shut
//!   down) runs on the calling thread.
//! - **Fault stops the frame**: after a node panics, nodes not yet released
//!   are dropped unrun and `execute` reports the first faulted node.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::Backoff;

use super::barrier::CompletionBarrier;
use super::error::GraphError;
use super::pool::PoolHandle;
use super::task::{Task, TaskOutcome};

type Body = Box<dyn FnOnce() + Send + 'static>;

/// Index of a node within one [`TaskGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Result slot filled by a node declared with
/// [`TaskGraph::add_with_output`].
///
/// Dependents read it with [`get`](Self::get); edge order guarantees the
/// value is present by the time they run.
pub struct TaskOutput<T> {
    cell: Arc<OnceLock<T>>,
}

impl<T> TaskOutput<T> {
    /// The produced value, or `None` if the producer has not run (or
    /// panicked).
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T> Clone for TaskOutput<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TaskOutput<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskOutput").field(&self.cell.get()).finish()
    }
}

/// Summary of one successful [`TaskGraph::execute`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphReport {
    /// Nodes executed.
    pub tasks: usize,
    /// Nodes run on the calling thread because the pool refused them.
    pub inline_runs: usize,
}

struct Node {
    name: &'static str,
    body: Body,
    successors: Vec<usize>,
    predecessors: usize,
}

/// Declarative DAG of named tasks, consumed by [`execute`](Self::execute).
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<Node>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(n),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Debug name of a node.
    pub fn name(&self, id: NodeId) -> Option<&'static str> {
        self.nodes.get(id.0).map(|n| n.name)
    }

    /// Declare a node with no predecessors.
    pub fn add<F>(&mut self, name: &'static str, body: F) -> NodeId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name,
            body: Box::new(body),
            successors: Vec::new(),
            predecessors: 0,
        });
        id
    }

    /// Declare a node that runs after every node in `after`.
    ///
    /// # Errors
    ///
    /// `UnknownTask` if a predecessor was not declared on this graph; the
    /// node is not added in that case.
    pub fn add_after<F>(
        &mut self,
        name: &'static str,
        after: &[NodeId],
        body: F,
    ) -> Result<NodeId, GraphError>
    where
        F: FnOnce() + Send + 'static,
    {
        for &dep in after {
            self.check(dep)?;
        }
        let id = self.add(name, body);
        for &dep in after {
            self.link(dep, id);
        }
        Ok(id)
    }

    /// Declare a node whose return value is kept for its dependents.
    ///
    /// ```
    /// use workgraph::{PoolConfig, TaskGraph, WorkerPool};
    ///
    /// let pool = WorkerPool::new(PoolConfig::with_workers(2)).unwrap();
    /// let mut graph = TaskGraph::new();
    /// let (a, sum) = graph.add_with_output("sum", &[], || (1..=10).sum::<u32>()).unwrap();
    /// let s = sum.clone();
    /// graph.add_after("check", &[a], move || assert_eq!(s.get(), Some(&55))).unwrap();
    /// graph.execute(&pool).unwrap();
    /// assert_eq!(sum.get(), Some(&55));
    /// # pool.send_shutdown();
    /// # pool.wait_for_workers_to_complete().unwrap();
    /// ```
    pub fn add_with_output<T, F>(
        &mut self,
        name: &'static str,
        after: &[NodeId],
        body: F,
    ) -> Result<(NodeId, TaskOutput<T>), GraphError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let cell = Arc::new(OnceLock::new());
        let slot = Arc::clone(&cell);
        let id = self.add_after(name, after, move || {
            let _ = slot.set(body());
        })?;
        Ok((id, TaskOutput { cell }))
    }

    /// Make `task` run after `depends_on`.
    ///
    /// Repeating an existing edge is a no-op.
    ///
    /// # Errors
    ///
    /// `UnknownTask` for an undeclared id; `Cycle` if `depends_on` already
    /// (transitively) depends on `task`, including `task == depends_on`.
    pub fn add_dependency(&mut self, task: NodeId, depends_on: NodeId) -> Result<(), GraphError> {
        self.check(task)?;
        self.check(depends_on)?;
        if self.reaches(task, depends_on) {
            return Err(GraphError::Cycle {
                from: depends_on,
                to: task,
            });
        }
        self.link(depends_on, task);
        Ok(())
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownTask(id))
        }
    }

    fn link(&mut self, from: NodeId, to: NodeId) {
        if self.nodes[from.0].successors.contains(&to.0) {
            return;
        }
        self.nodes[from.0].successors.push(to.0);
        self.nodes[to.0].predecessors += 1;
    }

    /// Is `target` reachable from `start` along successor edges?
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start.0];
        while let Some(i) = stack.pop() {
            if i == target.0 {
                return true;
            }
            if std::mem::replace(&mut seen[i], true) {
                continue;
            }
            stack.extend(self.nodes[i].successors.iter().copied());
        }
        false
    }

    /// Run the whole graph on `pool` and return once every node finished.
    ///
    /// The calling thread helps by stealing pool work while it waits, and
    /// runs any node the pool refuses.
    ///
    /// # Errors
    ///
    /// - `PoolShutDown` if the pool no longer accepts work (nothing runs).
    /// - `TaskFaulted` naming the first node that panicked; nodes released
    ///   after the fault are skipped and counted.
    pub fn execute<P>(self, pool: &P) -> Result<GraphReport, GraphError>
    where
        P: AsRef<PoolHandle>,
    {
        let pool = pool.as_ref();
        if pool.is_shutdown() {
            return Err(GraphError::PoolShutDown);
        }

        let n = self.nodes.len();
        let _span = tracing::debug_span!("task_graph", nodes = n).entered();

        let mut successors = Vec::with_capacity(n);
        let mut remaining = Vec::with_capacity(n);
        let mut bodies = Vec::with_capacity(n);
        for node in self.nodes {
            successors.push(node.successors);
            remaining.push(AtomicUsize::new(node.predecessors));
            bodies.push((node.name, node.body));
        }

        let parker = Parker::new();
        let run = Arc::new(GraphRun {
            pool: pool.clone(),
            caller: parker.unparker().clone(),
            deferred: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(n),
            slots: (0..n).map(|_| Mutex::new(None)).collect(),
            remaining,
            successors,
            failed: AtomicBool::new(false),
            first_fault: Mutex::new(None),
            skipped: AtomicUsize::new(0),
            inline_runs: AtomicUsize::new(0),
        });

        let barrier = CompletionBarrier::new();
        for (i, (name, body)) in bodies.into_iter().enumerate() {
            let mut task = Task::named(name, body);
            let r = Arc::clone(&run);
            task.subscribe(move |outcome| r.node_done(i, name, outcome));
            barrier.add_dependent_work(&mut task);
            *lock(&run.slots[i]) = Some(task);
        }

        let roots: Vec<usize> = (0..n)
            .filter(|&i| run.remaining[i].load(Ordering::Acquire) == 0)
            .collect();
        tracing::debug!(roots = roots.len(), "submitting graph roots");
        for i in roots {
            run.release(i);
        }

        run.drive(&parker);
        // The barrier only reports what `first_fault` already records.
        let _ = barrier.wait();

        // Every slot is empty once the barrier opens; clearing breaks the
        // watcher -> run reference cycle should a slot be left behind.
        for slot in &run.slots {
            let leftover = lock(slot).take();
            debug_assert!(leftover.is_none(), "graph node never released");
        }

        let fault = lock(&run.first_fault).take();
        if let Some(name) = fault {
            let skipped = run.skipped.load(Ordering::Acquire);
            tracing::warn!(task = name, skipped, "task graph faulted");
            return Err(GraphError::TaskFaulted { name, skipped });
        }

        let report = GraphReport {
            tasks: n,
            inline_runs: run.inline_runs.load(Ordering::Acquire),
        };
        tracing::debug!(inline_runs = report.inline_runs, "task graph complete");
        Ok(report)
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (i, node) in self.nodes.iter().enumerate() {
            list.entry(&format_args!(
                "{i}:{} -> {:?}",
                node.name, node.successors
            ));
        }
        list.finish()
    }
}

// ============================================================================
// Per-execution state
// ============================================================================

/// Shared by every node watcher of one `execute` call.
struct GraphRun {
    pool: PoolHandle,
    /// Wakes the thread inside `execute`.
    caller: Unparker,
    /// Ready nodes for the caller to run (pool refused) or drop (after a
    /// fault).
    deferred: Mutex<Vec<Task>>,
    /// Nodes whose watcher has not finished yet.
    outstanding: AtomicUsize,
    /// Built tasks waiting for their last predecessor.
    slots: Vec<Mutex<Option<Task>>>,
    /// Unresolved predecessor edges per node.
    remaining: Vec<AtomicUsize>,
    successors: Vec<Vec<usize>>,
    failed: AtomicBool,
    first_fault: Mutex<Option<&'static str>>,
    skipped: AtomicUsize,
    inline_runs: AtomicUsize,
}

impl GraphRun {
    /// Watcher for node `i`: resolve one edge on each successor.
    fn node_done(&self, i: usize, name: &'static str, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => {}
            TaskOutcome::Faulted => {
                let mut first = lock(&self.first_fault);
                if first.is_none() {
                    *first = Some(name);
                }
                self.failed.store(true, Ordering::Release);
            }
            TaskOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::AcqRel);
            }
        }

        for &succ in &self.successors[i] {
            if self.remaining[succ].fetch_sub(1, Ordering::AcqRel) == 1 {
                self.release(succ);
            }
        }

        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.caller.unpark();
        }
    }

    /// Hand a ready node to the pool, or to the caller's worklist when the
    /// pool refuses it or the run already faulted.
    fn release(&self, i: usize) {
        let task = lock(&self.slots[i]).take();
        let Some(task) = task else {
            panic!("graph node {i} released twice");
        };

        if self.failed.load(Ordering::Acquire) {
            self.defer(task);
            return;
        }

        if let Err(rejected) = self.pool.add_work(task) {
            self.inline_runs.fetch_add(1, Ordering::AcqRel);
            tracing::trace!(
                node = i,
                shutdown = rejected.is_shutdown(),
                "pool refused graph node; deferring to caller"
            );
            self.defer(rejected.into_task());
        }
    }

    fn defer(&self, task: Task) {
        lock(&self.deferred).push(task);
        self.caller.unpark();
    }

    /// Caller loop: run deferred nodes, steal pool work, sleep when neither
    /// exists. Returns once every node's watcher has finished.
    fn drive(&self, parker: &Parker) {
        let backoff = Backoff::new();
        let poll = self.pool.shared.park_timeout;

        while self.outstanding.load(Ordering::Acquire) != 0 {
            let deferred = lock(&self.deferred).pop();
            if let Some(task) = deferred {
                if self.failed.load(Ordering::Acquire) {
                    drop(task);
                } else {
                    self.pool.run_inline(task);
                }
                backoff.reset();
                continue;
            }

            if let Some(task) = self.pool.steal_some_work() {
                self.pool.run_inline(task);
                backoff.reset();
                continue;
            }

            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }
            // Every push to `deferred` and the final watcher unpark us; the
            // timeout only bounds how long stealable pool work can wait.
            parker.park_timeout(poll);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}
