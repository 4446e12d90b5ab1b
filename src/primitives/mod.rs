//! Low-level building blocks for the analysis engine.
//!
//! Includes the sparse identifier sets used for reachability bookkeeping and the
//! coordination helpers used by worker pools.

/// Sparse identifier sets.
///
/// Ordered, compressed sets of `u64` identifiers with bulk set algebra.
pub mod bitmap;

/// Concurrency primitives and synchronization.
///
/// Work queues, cancellation-aware channel submission and error aggregation.
pub mod concurrency;
