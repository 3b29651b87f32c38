//! Frame-loop driver for the work-stealing scheduler.
//!
//! Each frame runs a batch of independent jobs behind a
//! `CompletionBarrier`, then a task graph shaped like a game tick:
//!
//! ```text
//! input ─┬─► simulate[0] ─┐
//!        ├─► simulate[1] ─┼─► integrate ─► present
//!        └─► simulate[N] ─┘
//! ```
//!
//! # Output Format
//!
//! Statistics are written to stderr upon completion:
//! `frames=N tasks=N elapsed_ms=N frame_us_avg=N steals=N parks=N inline=N workers=N`
//!
//! Set `RUST_LOG=workgraph=debug` for pool lifecycle traces.
//!
//! # Exit Codes
//!
//! - `0`: Success
//! - `1`: Scheduler error (pool construction, task fault)
//! - `2`: Invalid arguments

use std::env;
use std::error::Error;
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use workgraph::{CompletionBarrier, PoolConfig, Task, TaskGraph, WorkerPool};

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS]

OPTIONS:
    --workers=<N>           Number of worker threads (default: CPU count - 1)
    --frames=<N>            Frames to run (default: 60)
    --tasks=<N>             Jobs per frame batch and graph width (default: 64)
    --queue-capacity=<N>    Per-worker queue capacity (default: 1024)
    --help, -h              Show this help message",
        exe.to_string_lossy()
    );
}

fn parse_count(flag: &str, value: &str) -> usize {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
            eprintln!("invalid {flag} value: {value} (expected integer >= 1)");
            std::process::exit(2);
        }
    }
}

struct Args {
    workers: Option<usize>,
    frames: usize,
    tasks: usize,
    queue_capacity: Option<usize>,
}

fn parse_args() -> Args {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "workgraph".into());
    let mut parsed = Args {
        workers: None,
        frames: 60,
        tasks: 64,
        queue_capacity: None,
    };

    for arg in args {
        let Some(flag) = arg.to_str() else {
            print_usage(&exe);
            std::process::exit(2);
        };
        if let Some(value) = flag.strip_prefix("--workers=") {
            parsed.workers = Some(parse_count("--workers", value));
        } else if let Some(value) = flag.strip_prefix("--frames=") {
            parsed.frames = parse_count("--frames", value);
        } else if let Some(value) = flag.strip_prefix("--tasks=") {
            parsed.tasks = parse_count("--tasks", value);
        } else if let Some(value) = flag.strip_prefix("--queue-capacity=") {
            parsed.queue_capacity = Some(parse_count("--queue-capacity", value));
        } else if flag == "--help" || flag == "-h" {
            print_usage(&exe);
            std::process::exit(0);
        } else {
            eprintln!("unknown argument: {flag}");
            print_usage(&exe);
            std::process::exit(2);
        }
    }
    parsed
}

/// Stand-in for per-entity work: a short integer hash chain.
fn spin(seed: u64, rounds: u32) -> u64 {
    let mut x = seed | 1;
    for _ in 0..rounds {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
    }
    black_box(x)
}

fn run_frame(pool: &WorkerPool, frame: u64, width: usize) -> Result<usize, Box<dyn Error>> {
    // Independent batch behind a barrier.
    let barrier = CompletionBarrier::new();
    let checksum = Arc::new(AtomicU64::new(0));
    for i in 0..width {
        let c = Arc::clone(&checksum);
        let mut task = Task::named("batch", move || {
            c.fetch_xor(spin(frame ^ i as u64, 256), Ordering::Relaxed);
        });
        barrier.add_dependent_work(&mut task);
        if let Err(rejected) = pool.add_work(task) {
            // Full queues: run it here instead of dropping the frame.
            pool.handle().run_inline(rejected.into_task());
        }
    }
    barrier.add_on_completion_event(move || tracing::trace!(frame, "batch complete"));
    barrier.join(&pool.handle())?;

    // Dependency graph.
    let mut graph = TaskGraph::with_capacity(width + 3);
    let (input, seed) = graph.add_with_output("input", &[], move || spin(frame, 64))?;
    let mut sims = Vec::with_capacity(width);
    let mut outputs = Vec::with_capacity(width);
    for i in 0..width {
        let seed = seed.clone();
        let (id, out) = graph.add_with_output("simulate", &[input], move || {
            spin(seed.get().copied().unwrap_or(0) ^ i as u64, 512)
        })?;
        sims.push(id);
        outputs.push(out);
    }
    let (integrate, total) = graph.add_with_output("integrate", &sims, move || {
        outputs
            .iter()
            .filter_map(|o| o.get().copied())
            .fold(0u64, u64::wrapping_add)
    })?;
    graph.add_after("present", &[integrate], move || {
        black_box(total.get().copied());
    })?;

    let report = graph.execute(pool)?;
    black_box(checksum.load(Ordering::Relaxed));
    Ok(report.inline_runs)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut cfg = PoolConfig::default();
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(capacity) = args.queue_capacity {
        cfg.queue_capacity = capacity;
    }
    let workers = cfg.workers;
    let pool = WorkerPool::new(cfg)?;

    let start = Instant::now();
    let mut inline = 0usize;
    for frame in 0..args.frames {
        inline += run_frame(&pool, frame as u64, args.tasks)?;
    }
    let elapsed = start.elapsed();

    pool.send_shutdown();
    let metrics = pool.wait_for_workers_to_complete()?;

    let per_frame_tasks = 2 * args.tasks + 3;
    eprintln!(
        "frames={} tasks={} elapsed_ms={} frame_us_avg={:.1} steals={} parks={} inline={} workers={}",
        args.frames,
        args.frames * per_frame_tasks,
        elapsed.as_millis(),
        elapsed.as_secs_f64() * 1e6 / args.frames as f64,
        metrics.steal_successes,
        metrics.park_count,
        inline,
        workers
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    if let Err(e) = run(args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
