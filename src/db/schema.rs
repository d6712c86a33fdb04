/// Schema for cache partitions and the durable sync store.
pub const SCHEMA: &str = r#"
-- One row per named cache partition
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- At most one entry per request key per partition
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    ttl_ms INTEGER,
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_partition ON cache_entries(partition);

-- Deferred mutations, keyed by task type + timestamp
CREATE TABLE IF NOT EXISTS sync_store (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
"#;
