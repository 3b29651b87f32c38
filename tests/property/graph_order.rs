//! Random DAGs: every node runs once and after all of its predecessors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use proptest::prelude::*;

use workgraph::{GraphError, NodeId, PoolConfig, TaskGraph, WorkerPool};

/// One pool for every case; spawning threads per case dominates otherwise.
fn shared_pool() -> &'static WorkerPool {
    static POOL: OnceLock<WorkerPool> = OnceLock::new();
    POOL.get_or_init(|| {
        WorkerPool::new(PoolConfig {
            workers: 3,
            park_timeout: Duration::from_micros(200),
            ..PoolConfig::default()
        })
        .unwrap()
    })
}

/// Node count plus a forward-edge list (`from < to`, so always acyclic).
fn dag_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..=24).prop_flat_map(|n| {
        let edges = prop::collection::vec((0..n, 0..n), 0..=n * 2).prop_map(|pairs| {
            pairs
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect::<Vec<_>>()
        });
        (Just(n), edges)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn nodes_run_once_in_edge_order((n, edges) in dag_strategy()) {
        let clock = Arc::new(AtomicUsize::new(0));
        let stamps: Arc<Vec<AtomicUsize>> =
            Arc::new((0..n).map(|_| AtomicUsize::new(usize::MAX)).collect());
        let runs: Arc<Vec<AtomicUsize>> =
            Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect());

        let mut graph = TaskGraph::with_capacity(n);
        let ids: Vec<NodeId> = (0..n)
            .map(|i| {
                let (clock, stamps, runs) =
                    (Arc::clone(&clock), Arc::clone(&stamps), Arc::clone(&runs));
                graph.add("node", move || {
                    runs[i].fetch_add(1, Ordering::AcqRel);
                    stamps[i].store(clock.fetch_add(1, Ordering::AcqRel), Ordering::Release);
                })
            })
            .collect();
        for &(from, to) in &edges {
            prop_assert_eq!(graph.add_dependency(ids[to], ids[from]), Ok(()));
        }

        let report = graph.execute(shared_pool()).unwrap();
        prop_assert_eq!(report.tasks, n);

        for i in 0..n {
            prop_assert_eq!(runs[i].load(Ordering::Acquire), 1, "node {} run count", i);
        }
        for &(from, to) in &edges {
            let (a, b) = (
                stamps[from].load(Ordering::Acquire),
                stamps[to].load(Ordering::Acquire),
            );
            prop_assert!(a < b, "edge {} -> {} ran out of order ({} >= {})", from, to, a, b);
        }
    }

    #[test]
    fn back_edges_are_always_rejected((n, edges) in dag_strategy()) {
        let mut graph = TaskGraph::with_capacity(n);
        let ids: Vec<NodeId> = (0..n).map(|_| graph.add("node", || {})).collect();
        for &(from, to) in &edges {
            graph.add_dependency(ids[to], ids[from]).unwrap();
        }
        // Reversing any existing edge closes a cycle.
        for &(from, to) in &edges {
            prop_assert_eq!(
                graph.add_dependency(ids[from], ids[to]),
                Err(GraphError::Cycle { from: ids[to], to: ids[from] })
            );
        }
    }
}
