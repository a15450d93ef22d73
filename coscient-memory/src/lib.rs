//! COSCIENT Memory - Context Memory
//!
//! Persistent, file-backed state management for the co-scientist runtime:
//! timestamped state updates and agent outputs organized into iterations,
//! globally-serialized checkpoints, append-only aggregates, a general
//! key-value store, temporal read guarantees, and retention/archival/
//! garbage collection.

mod aggregate;
mod checkpoint;
mod iteration;
mod kv;
mod memory;
mod records;
mod retention;
mod store;
mod temporal;

pub use aggregate::{AggregateStatistics, AggregateSummary, MergeStrategy};
pub use memory::ContextMemory;
pub use records::*;
pub use retention::{CleanupMetrics, CleanupRun, GarbageStats};
