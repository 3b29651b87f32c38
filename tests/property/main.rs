//! Property-based tests over randomized graph shapes and workloads.
//!
//! Run with: `cargo test --test property`

mod graph_order;
mod pool_exactly_once;
