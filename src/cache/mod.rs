//! Versioned cache partitions for offline support.
//!
//! This module provides:
//! - Named partitions grouped into generations, one generation per deployed version
//! - A store that opens, reads, writes and prunes those partitions
//! - SQLite and in-memory storage backends behind one trait
//! - Engine-stamped `stored_at` times for TTL checks

mod generation;
mod storage;
mod store;
mod traits;

pub use generation::{CacheGeneration, PartitionKind, Partitions};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use store::{CacheHandle, CacheStore};
pub use traits::{CacheEntry, CachedResponse};
