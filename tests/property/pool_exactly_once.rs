//! Random pool shapes and loads: accepted work runs exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use workgraph::{PoolConfig, SubmitError, Task, WorkerPool};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_task_runs_exactly_once(
        workers in 1usize..=4,
        queue_capacity in 1usize..=32,
        n in 0usize..=300,
    ) {
        let pool = WorkerPool::new(PoolConfig {
            workers,
            queue_capacity,
            park_timeout: Duration::from_micros(100),
            ..PoolConfig::default()
        })
        .unwrap();

        let runs: Arc<Vec<AtomicUsize>> =
            Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect());
        let mut handles = Vec::with_capacity(n);
        let mut inline = 0usize;

        for i in 0..n {
            let r = Arc::clone(&runs);
            let task = Task::new(move || {
                r[i].fetch_add(1, Ordering::Relaxed);
            });
            handles.push(task.handle());
            match pool.submit(task) {
                Ok(_) => {}
                Err(SubmitError::Full(task)) => {
                    inline += 1;
                    task.run().unwrap();
                }
                Err(e) => panic!("unexpected rejection: {e}"),
            }
        }

        pool.send_shutdown();
        let metrics = pool.wait_for_workers_to_complete().unwrap();

        prop_assert!(runs.iter().all(|c| c.load(Ordering::Relaxed) == 1));
        prop_assert!(handles.iter().all(|h| h.is_released()));
        prop_assert_eq!(metrics.tasks_executed as usize + inline, n);
    }
}
