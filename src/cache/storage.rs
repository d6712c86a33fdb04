//! Cache storage trait and its SQLite and in-memory implementations.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::db::Database;

use super::traits::{CacheEntry, CachedResponse};

/// Trait for cache storage backends.
///
/// Partitions are created implicitly by the first write into them.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn create_partition(&self, name: &str) -> Result<()>;

  /// Names of all existing partitions.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Drop a partition with all its entries as one unit.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  fn get(&self, partition: &str, request_key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or replace the entry for `entry.request_key`.
  fn put(&self, partition: &str, entry: &CacheEntry) -> Result<()>;

  /// Insert all entries or none of them.
  fn put_all(&self, partition: &str, entries: &[CacheEntry]) -> Result<()>;

  /// Request keys stored in a partition.
  fn keys(&self, partition: &str) -> Result<Vec<String>>;
}

/// Storage kept in process memory. Used for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryStorage {
  partitions: Mutex<BTreeMap<String, BTreeMap<String, CacheEntry>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<String, BTreeMap<String, CacheEntry>>) -> R) -> Result<R> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut partitions))
  }
}

impl CacheStorage for MemoryStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    self.with(|p| {
      p.entry(name.to_string()).or_default();
    })
  }

  fn partitions(&self) -> Result<Vec<String>> {
    self.with(|p| p.keys().cloned().collect())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    self.with(|p| p.remove(name).is_some())
  }

  fn get(&self, partition: &str, request_key: &str) -> Result<Option<CacheEntry>> {
    self.with(|p| p.get(partition).and_then(|entries| entries.get(request_key).cloned()))
  }

  fn put(&self, partition: &str, entry: &CacheEntry) -> Result<()> {
    self.with(|p| {
      p.entry(partition.to_string())
        .or_default()
        .insert(entry.request_key.clone(), entry.clone());
    })
  }

  fn put_all(&self, partition: &str, entries: &[CacheEntry]) -> Result<()> {
    self.with(|p| {
      let target = p.entry(partition.to_string()).or_default();
      for entry in entries {
        target.insert(entry.request_key.clone(), entry.clone());
      }
    })
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    self.with(|p| {
      p.get(partition)
        .map(|entries| entries.keys().cloned().collect())
        .unwrap_or_default()
    })
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

/// SHA256 of the request key, for a stable fixed-length primary key.
fn key_hash(request_key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request_key.as_bytes());
  hex::encode(hasher.finalize())
}

fn insert_entry(conn: &rusqlite::Connection, partition: &str, entry: &CacheEntry) -> Result<()> {
  let headers = serde_json::to_string(&entry.response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (partition, key_hash, request_key, status, headers, body, stored_at, ttl_ms)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        partition,
        key_hash(&entry.request_key),
        entry.request_key,
        entry.response.status,
        headers,
        entry.response.body,
        entry.stored_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        entry.ttl.map(|t| t.num_milliseconds()),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", entry.request_key, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get(&self, partition: &str, request_key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.db.lock()?;
    let row: Option<(u16, String, Vec<u8>, String, Option<i64>)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at, ttl_ms FROM cache_entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key_hash(request_key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entry {}: {}", request_key, e))?;

    let Some((status, headers, body, stored_at, ttl_ms)) = row else {
      return Ok(None);
    };

    let headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to parse headers of {}: {}", request_key, e))?;

    Ok(Some(CacheEntry {
      request_key: request_key.to_string(),
      response: CachedResponse {
        status,
        headers,
        body,
      },
      stored_at: parse_datetime(&stored_at)?,
      ttl: ttl_ms.map(Duration::milliseconds),
    }))
  }

  fn put(&self, partition: &str, entry: &CacheEntry) -> Result<()> {
    let conn = self.db.lock()?;
    insert_entry(&conn, partition, entry)
  }

  fn put_all(&self, partition: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for entry in entries {
      // Dropping `tx` on error rolls everything back
      insert_entry(&tx, partition, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE partition = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Headers;

  fn entry(key: &str, body: &str) -> CacheEntry {
    CacheEntry {
      request_key: key.to_string(),
      response: CachedResponse {
        status: 200,
        headers: Headers::from([("content-type".to_string(), "text/plain".to_string())]),
        body: body.as_bytes().to_vec(),
      },
      stored_at: Utc::now(),
      ttl: Some(Duration::minutes(5)),
    }
  }

  fn backends() -> Vec<Box<dyn CacheStorage>> {
    vec![
      Box::new(MemoryStorage::new()),
      Box::new(SqliteStorage::new(Database::in_memory().unwrap())),
    ]
  }

  #[test]
  fn test_put_replaces_entry_for_same_key() {
    for storage in backends() {
      storage.put("p", &entry("https://a.test/x", "one")).unwrap();
      storage.put("p", &entry("https://a.test/x", "two")).unwrap();

      let got = storage.get("p", "https://a.test/x").unwrap().unwrap();
      assert_eq!(got.response.body, b"two");
      assert_eq!(storage.keys("p").unwrap().len(), 1);
    }
  }

  #[test]
  fn test_sqlite_round_trips_metadata() {
    let storage = SqliteStorage::new(Database::in_memory().unwrap());
    let original = entry("https://a.test/api", "{}");
    storage.put("api", &original).unwrap();

    let got = storage.get("api", "https://a.test/api").unwrap().unwrap();
    assert_eq!(got.ttl, Some(Duration::minutes(5)));
    assert_eq!(got.response.headers.get("content-type").unwrap(), "text/plain");
    // Stored with millisecond precision
    assert!((got.stored_at - original.stored_at).num_milliseconds().abs() < 1);
  }

  #[test]
  fn test_delete_partition_removes_entries() {
    for storage in backends() {
      storage.put("old", &entry("https://a.test/1", "1")).unwrap();
      storage.put("new", &entry("https://a.test/1", "1")).unwrap();

      assert!(storage.delete_partition("old").unwrap());
      assert!(!storage.delete_partition("old").unwrap());
      assert!(storage.get("old", "https://a.test/1").unwrap().is_none());
      assert!(storage.get("new", "https://a.test/1").unwrap().is_some());
      assert_eq!(storage.partitions().unwrap(), vec!["new".to_string()]);
    }
  }

  #[test]
  fn test_partitions_are_isolated() {
    for storage in backends() {
      storage.create_partition("empty").unwrap();
      storage.put("full", &entry("https://a.test/1", "1")).unwrap();

      assert!(storage.get("empty", "https://a.test/1").unwrap().is_none());
      assert_eq!(storage.partitions().unwrap().len(), 2);
    }
  }

  #[test]
  fn test_put_all_persists_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    {
      let storage = SqliteStorage::new(Database::open(Some(&path)).unwrap());
      storage
        .put_all("static", &[entry("https://a.test/", "index"), entry("https://a.test/app.js", "js")])
        .unwrap();
    }

    // Reopen from disk
    let storage = SqliteStorage::new(Database::open(Some(&path)).unwrap());
    assert_eq!(storage.keys("static").unwrap().len(), 2);
  }
}
