//! Barrier scenarios driven through a live pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use workgraph::{BarrierError, CompletionBarrier, PoolConfig, Task, WorkerPool};

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::new(PoolConfig {
        workers,
        park_timeout: Duration::from_micros(200),
        ..PoolConfig::default()
    })
    .unwrap()
}

/// 4 workers, 100 increments, one barrier with a completion callback.
#[test]
fn hundred_increments_then_callback() {
    let pool = pool(4);
    let barrier = CompletionBarrier::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(Mutex::new(None));

    let mut tasks = Vec::with_capacity(100);
    for _ in 0..100 {
        let c = Arc::clone(&counter);
        let mut task = Task::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
        barrier.add_dependent_work(&mut task);
        tasks.push(task);
    }

    let (c, o) = (Arc::clone(&counter), Arc::clone(&observed));
    barrier.add_on_completion_event(move || {
        *o.lock().unwrap() = Some(c.load(Ordering::Relaxed));
    });

    for task in tasks {
        pool.submit(task).unwrap();
    }
    barrier.wait().unwrap();

    assert_eq!(counter.load(Ordering::Relaxed), 100);
    assert_eq!(*observed.lock().unwrap(), Some(100));

    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();
}

/// Dependents finishing on different workers, waited on from several
/// threads at once: every waiter returns after the last dependent and the
/// callback fires exactly once.
#[test]
fn concurrent_waiters_share_one_callback() {
    const D: usize = 32;
    let pool = pool(4);
    let barrier = CompletionBarrier::new();
    let done = Arc::new(AtomicUsize::new(0));
    let fired = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::with_capacity(D);
    for i in 0..D {
        let d = Arc::clone(&done);
        let mut task = Task::new(move || {
            if i % 5 == 0 {
                thread::sleep(Duration::from_micros(300));
            }
            d.fetch_add(1, Ordering::AcqRel);
        });
        barrier.add_dependent_work(&mut task);
        tasks.push(task);
    }
    let f = Arc::clone(&fired);
    barrier.add_on_completion_event(move || {
        f.fetch_add(1, Ordering::AcqRel);
    });

    let waiters: Vec<_> = (0..3)
        .map(|k| {
            let b = barrier.clone();
            let h = pool.handle();
            let d = Arc::clone(&done);
            thread::spawn(move || {
                let res = if k == 0 { b.join(&h) } else { b.wait() };
                assert_eq!(d.load(Ordering::Acquire), D);
                res
            })
        })
        .collect();

    for task in tasks {
        pool.submit(task).unwrap();
    }
    for w in waiters {
        assert_eq!(w.join().unwrap(), Ok(()));
    }
    assert_eq!(fired.load(Ordering::Acquire), 1);

    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();
}

#[test]
fn panicking_dependent_surfaces_on_wait_and_pool() {
    let pool = pool(2);
    let barrier = CompletionBarrier::new();
    let fired = Arc::new(AtomicUsize::new(0));

    // The faulting task goes last so every submit lands before shutdown.
    for i in 0..10 {
        let mut task = Task::new(move || {
            if i == 9 {
                panic!("intentional test panic");
            }
        });
        barrier.add_dependent_work(&mut task);
        pool.submit(task).unwrap();
    }
    let f = Arc::clone(&fired);
    barrier.add_on_completion_event(move || {
        f.fetch_add(1, Ordering::AcqRel);
    });

    assert_eq!(barrier.wait(), Err(BarrierError::DependentFaulted(1)));
    assert_eq!(fired.load(Ordering::Acquire), 0);

    pool.send_shutdown();
    let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pool.wait_for_workers_to_complete()
    }));
    assert!(res.is_err());
}

#[test]
fn barrier_is_reusable_across_frames() {
    let pool = pool(2);
    let barrier = CompletionBarrier::new();
    let total = Arc::new(AtomicUsize::new(0));

    for frame in 1..=5 {
        for _ in 0..frame {
            let t = Arc::clone(&total);
            let mut task = Task::new(move || {
                t.fetch_add(1, Ordering::Relaxed);
            });
            barrier.add_dependent_work(&mut task);
            pool.submit(task).unwrap();
        }
        barrier.join(&pool.handle()).unwrap();
        assert_eq!(barrier.pending(), 0);
    }
    assert_eq!(total.load(Ordering::Relaxed), 15);

    pool.send_shutdown();
    pool.wait_for_workers_to_complete().unwrap();
}
