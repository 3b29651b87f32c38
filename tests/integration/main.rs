//! Integration tests for the pool, barrier, and task graph.
//!
//! Run with: `cargo test --test integration`

mod barrier_scenarios;
mod graph_scenarios;
mod pool_lifecycle;
