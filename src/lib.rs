#![doc = r#"
seglog: Append-Only Log-Structured Key-Value Store in Rust

This crate provides a single-node key-value store built on an append-only,
segmented log with a fully in-memory hash index. It is designed for fast
point reads and writes under a single-writer / many-readers discipline, with
support for:
- Serialized writes through a dedicated writer thread
- Parallel reads through a bounded worker pool
- Crash recovery by replaying segment files on open
- Explicit merge (compaction) collapsing all segments into one
- Thread-safe architecture

See the README for usage examples and more details.
"#]
// Declare modules
pub mod core;
pub mod error;
pub mod index;
pub mod record;
pub mod segment;
pub mod telemetry;

mod merge;
mod pool;
mod recovery;
mod writer;

/// Main entry point for interacting with the key-value store.
pub use crate::core::Store;
/// Configuration options for the store.
pub use crate::core::StoreOptions;
/// Error type for store operations.
pub use crate::error::StoreError;
/// Location of a record on disk, as tracked by the index.
pub use crate::index::SlotRef;
/// Summary of one merge (compaction) cycle.
pub use crate::merge::MergeStats;
/// Structured event hook for observability.
pub use crate::telemetry::{StoreEvent, StoreEventListener};

/// Default size threshold at which the active segment rolls over (10 MiB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;
/// Default number of reader worker threads.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 1000;
