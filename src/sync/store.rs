//! Durable key-value store behind the sync queue.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::db::Database;

/// A single keyed store of `{key, data}` records.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Value>>;

  async fn put(&self, key: &str, data: &Value) -> Result<()>;

  /// Returns whether a record was removed.
  async fn delete(&self, key: &str) -> Result<bool>;

  /// Keys starting with `prefix`, in ascending order.
  async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryStore {
  records: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Value>) -> R) -> Result<R> {
    let mut records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut records))
  }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    self.with(|r| r.get(key).cloned())
  }

  async fn put(&self, key: &str, data: &Value) -> Result<()> {
    self.with(|r| {
      r.insert(key.to_string(), data.clone());
    })
  }

  async fn delete(&self, key: &str) -> Result<bool> {
    self.with(|r| r.remove(key).is_some())
  }

  async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    self.with(|r| {
      r.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
    })
  }
}

/// `sync_store` table in the shared database.
pub struct SqliteStore {
  db: Database,
}

impl SqliteStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

/// Escape `%`, `_` and the escape char itself for a LIKE prefix match.
fn like_prefix(prefix: &str) -> String {
  let mut pattern = String::with_capacity(prefix.len() + 1);
  for c in prefix.chars() {
    if matches!(c, '%' | '_' | '\\') {
      pattern.push('\\');
    }
    pattern.push(c);
  }
  pattern.push('%');
  pattern
}

#[async_trait]
impl KeyValueStore for SqliteStore {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    let conn = self.db.lock()?;
    let data: Option<String> = conn
      .query_row("SELECT data FROM sync_store WHERE key = ?", params![key], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to read record {}: {}", key, e))?;

    data
      .map(|d| serde_json::from_str(&d).map_err(|e| eyre!("Failed to parse record {}: {}", key, e)))
      .transpose()
  }

  async fn put(&self, key: &str, data: &Value) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO sync_store (key, data) VALUES (?, ?)",
        params![key, data.to_string()],
      )
      .map_err(|e| eyre!("Failed to write record {}: {}", key, e))?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool> {
    let conn = self.db.lock()?;
    let removed = conn
      .execute("DELETE FROM sync_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete record {}: {}", key, e))?;
    Ok(removed > 0)
  }

  async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT key FROM sync_store WHERE key LIKE ? ESCAPE '\\' ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![like_prefix(prefix)], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list records: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    // LIKE is case-insensitive for ASCII
    Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn stores() -> Vec<Box<dyn KeyValueStore>> {
    vec![
      Box::new(MemoryStore::new()),
      Box::new(SqliteStore::new(Database::in_memory().unwrap())),
    ]
  }

  #[tokio::test]
  async fn test_put_get_delete() {
    for store in stores() {
      store.put("search:1", &json!({"q": "loft"})).await.unwrap();
      assert_eq!(store.get("search:1").await.unwrap(), Some(json!({"q": "loft"})));

      assert!(store.delete("search:1").await.unwrap());
      assert!(!store.delete("search:1").await.unwrap());
      assert_eq!(store.get("search:1").await.unwrap(), None);
    }
  }

  #[tokio::test]
  async fn test_prefix_scan_is_ordered_and_exact() {
    for store in stores() {
      store.put("search:2", &json!(2)).await.unwrap();
      store.put("search:1", &json!(1)).await.unwrap();
      store.put("SEARCH:0", &json!(0)).await.unwrap();
      store.put("search_x:1", &json!(9)).await.unwrap();
      store.put("user-data:1", &json!(3)).await.unwrap();

      assert_eq!(
        store.keys_with_prefix("search:").await.unwrap(),
        vec!["search:1", "search:2"]
      );
    }
  }

  #[test]
  fn test_like_prefix_escapes_wildcards() {
    assert_eq!(like_prefix("a_b%"), "a\\_b\\%%");
  }
}
