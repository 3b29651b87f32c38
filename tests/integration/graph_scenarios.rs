//! Task graph runs against a live pool.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use workgraph::{GraphError, PoolConfig, TaskGraph, WorkerPool};

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::new(PoolConfig {
        workers,
        park_timeout: Duration::from_micros(200),
        ..PoolConfig::default()
    })
    .unwrap()
}

/// A writes a plain (relaxed) value, B reads it: the edge alone must make
/// the write visible, over many frames and interleavings.
#[test]
fn predecessor_writes_are_visible_to_successor() {
    let pool = pool(4);
    for frame in 0..1_000u64 {
        let cell = Arc::new(AtomicU64::new(0));
        let seen = Arc::new(AtomicU64::new(u64::MAX));

        let mut graph = TaskGraph::new();
        let w = Arc::clone(&cell);
        let a = graph.add("write", move || w.store(frame + 1, Ordering::Relaxed));
        let (r, s) = (Arc::clone(&cell), Arc::clone(&seen));
        graph
            .add_after("read", &[a], move || {
                s.store(r.load(Ordering::Relaxed), Ordering::Relaxed)
            })
            .unwrap();
        // Unrelated noise so the pair lands on varying workers.
        for _ in 0..(frame % 4) {
            graph.add("noise", || {
                std::hint::black_box((0..64u64).sum::<u64>());
            });
        }

        graph.execute(&pool).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), frame + 1, "frame {frame}");
    }
    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();
}

/// A -> B -> C with an independent D, repeated. D may land anywhere.
#[test]
fn frame_loop_respects_chain_order() {
    let pool = pool(3);
    for _ in 0..200 {
        let log = Arc::new(Mutex::new(Vec::with_capacity(4)));
        let push = |tag: &'static str| {
            let log = Arc::clone(&log);
            move || log.lock().unwrap().push(tag)
        };

        let mut graph = TaskGraph::with_capacity(4);
        let a = graph.add("A", push("A"));
        let b = graph.add("B", push("B"));
        let c = graph.add("C", push("C"));
        graph.add("D", push("D"));
        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(c, b).unwrap();

        graph.execute(&pool.handle()).unwrap();

        let log = log.lock().unwrap();
        let pos = |t: &str| log.iter().position(|&x| x == t).unwrap();
        assert!(pos("A") < pos("B") && pos("B") < pos("C"), "{log:?}");
        assert!(log.contains(&"D"));
    }
    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();
}

#[test]
fn chain_tail_sees_every_upstream_write() {
    let pool = pool(4);
    for frame in 0..100u64 {
        let mut graph = TaskGraph::new();
        let (a, a_out) = graph.add_with_output("A", &[], move || frame).unwrap();
        let a_in = a_out.clone();
        let (b, b_out) = graph
            .add_with_output("B", &[a], move || a_in.get().copied().unwrap() + 1)
            .unwrap();
        let (a_in, b_in) = (a_out.clone(), b_out.clone());
        let (_, c_out) = graph
            .add_with_output("C", &[b], move || {
                (a_in.get().copied(), b_in.get().copied())
            })
            .unwrap();
        let (_, d_out) = graph.add_with_output("D", &[], || "independent").unwrap();

        graph.execute(&pool).unwrap();
        assert_eq!(c_out.get(), Some(&(Some(frame), Some(frame + 1))));
        assert_eq!(d_out.get(), Some(&"independent"));
    }
    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();
}

#[test]
fn wide_fan_out_fan_in() {
    const WIDTH: usize = 256;
    let pool = pool(4);
    let hits = Arc::new(AtomicUsize::new(0));

    let mut graph = TaskGraph::with_capacity(WIDTH + 2);
    let root = graph.add("root", || {});
    let mids: Vec<_> = (0..WIDTH)
        .map(|_| {
            let h = Arc::clone(&hits);
            graph
                .add_after("mid", &[root], move || {
                    h.fetch_add(1, Ordering::AcqRel);
                })
                .unwrap()
        })
        .collect();
    let h = Arc::clone(&hits);
    let (_, seen) = graph
        .add_with_output("sink", &mids, move || h.load(Ordering::Acquire))
        .unwrap();

    let report = graph.execute(&pool).unwrap();
    assert_eq!(report.tasks, WIDTH + 2);
    assert_eq!(seen.get(), Some(&WIDTH));

    pool.send_shutdown();
    let metrics = pool.wait_for_workers_to_complete().unwrap();
    assert!(metrics.tasks_executed <= (WIDTH + 2) as u64);
}

#[test]
fn execute_after_teardown_is_rejected() {
    let pool = pool(1);
    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();

    let mut graph = TaskGraph::new();
    graph.add("a", || {});
    assert_eq!(graph.execute(&pool), Err(GraphError::PoolShutDown));
}
