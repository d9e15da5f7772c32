//! # Keyspace Engine
//!
//! The concurrency-safe map of typed values, the per-key locking discipline,
//! sorted-set semantics, and eviction policy that the command dispatcher
//! builds on.

pub mod eviction;
pub mod keyspace;
pub mod value;
pub mod zset;

pub use eviction::EvictionPolicy;
pub use keyspace::{
    run_ttl_sweep, ExpiryPolicy, KeyEntry, KeyReadGuard, KeyWriteGuard, Keyspace, SnapshotEntry,
};
pub use value::Value;
