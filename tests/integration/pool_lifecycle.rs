//! Pool start/submit/teardown sequences seen from outside the crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use workgraph::{PoolConfig, PoolError, SubmitError, Task, TaskState, WorkerPool, WorkerState};

fn config(workers: usize) -> PoolConfig {
    PoolConfig {
        workers,
        park_timeout: Duration::from_micros(200),
        ..PoolConfig::default()
    }
}

#[test]
fn submissions_from_many_threads_all_run() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 250;

    let pool = WorkerPool::new(config(3)).unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let handle = pool.handle();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for _ in 0..PER_PRODUCER {
                    let d = Arc::clone(&done);
                    handle
                        .submit(Task::new(move || {
                            d.fetch_add(1, Ordering::Relaxed);
                        }))
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    pool.send_shutdown();
    let metrics = pool.wait_for_workers_to_complete().unwrap();
    assert_eq!(done.load(Ordering::Relaxed), PRODUCERS * PER_PRODUCER);
    assert_eq!(metrics.tasks_executed, (PRODUCERS * PER_PRODUCER) as u64);
}

#[test]
fn teardown_twice_and_drop_are_harmless() {
    let pool = WorkerPool::new(config(2)).unwrap();
    pool.submit(Task::new(|| {})).unwrap();

    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();
    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();

    assert_eq!(pool.awake_workers(), 0);
    assert_eq!(pool.worker_state(0), WorkerState::Shutdown);
    assert_eq!(pool.worker_state(1), WorkerState::Shutdown);
    drop(pool);
}

#[test]
fn rejected_task_is_handed_back_unrun() {
    let pool = WorkerPool::new(config(1)).unwrap();
    pool.send_shutdown();

    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let err = pool
        .submit(Task::named("late", move || {
            r.fetch_add(1, Ordering::Relaxed);
        }))
        .unwrap_err();

    let task = match err {
        SubmitError::ShutDown(task) => task,
        other => panic!("expected ShutDown, got {other:?}"),
    };
    assert_eq!(task.name(), Some("late"));
    assert_eq!(task.state(), TaskState::Submitted);

    // The caller may still run it itself.
    task.run().unwrap();
    assert_eq!(ran.load(Ordering::Relaxed), 1);
    pool.wait_for_workers_to_complete().unwrap();
}

#[test]
fn invalid_config_is_an_error() {
    assert!(matches!(
        WorkerPool::new(config(0)),
        Err(PoolError::InvalidConfig(_))
    ));
    let cfg = PoolConfig {
        park_timeout: Duration::ZERO,
        ..config(1)
    };
    assert!(matches!(
        WorkerPool::new(cfg),
        Err(PoolError::InvalidConfig(_))
    ));
}

#[test]
fn parked_pool_wakes_for_each_burst() {
    let pool = WorkerPool::new(config(2)).unwrap();
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(2));
        let (tx, rx) = mpsc::channel();
        for _ in 0..10 {
            let tx = tx.clone();
            pool.submit(Task::new(move || tx.send(()).unwrap())).unwrap();
        }
        drop(tx);
        assert_eq!(rx.iter().take(10).count(), 10);
    }
    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();
}
