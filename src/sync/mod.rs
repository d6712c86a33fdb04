//! Deferred mutations and their replay once connectivity returns.

mod queue;
mod store;

pub use queue::{default_queues, DrainReport, SyncQueue, SyncQueueConfig, SyncTask, IDEMPOTENCY_HEADER};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
