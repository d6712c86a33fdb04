//! Cache store that owns named partitions and the entries inside them.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::net::Response;

use super::storage::{CacheStorage, MemoryStorage};
use super::traits::CacheEntry;

/// Handle to an opened partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheHandle {
  name: String,
}

impl CacheHandle {
  pub fn name(&self) -> &str {
    &self.name
  }
}

/// Cache store manager.
///
/// Passed around by handle rather than reached through a global, so every
/// component that reads or writes the cache can be given a test backend.
/// Concurrent writers to the same key are not isolated; the last write wins.
#[derive(Clone)]
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
}

impl CacheStore {
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  pub fn in_memory() -> Self {
    Self::new(MemoryStorage::new())
  }

  /// Open a partition, creating it if needed.
  pub fn open(&self, name: &str) -> Result<CacheHandle> {
    self.storage.create_partition(name)?;
    Ok(CacheHandle {
      name: name.to_string(),
    })
  }

  pub fn match_entry(&self, handle: &CacheHandle, key: &str) -> Result<Option<CacheEntry>> {
    self.storage.get(&handle.name, key)
  }

  /// First match across `handles`, in order. Entries past their own TTL
  /// at `now` are skipped.
  pub fn match_any(&self, handles: &[CacheHandle], key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
    for handle in handles {
      match self.storage.get(&handle.name, key)? {
        Some(entry) if entry.ttl.is_some_and(|ttl| !entry.is_fresh(now, ttl)) => {
          debug!(partition = %handle.name, key, "skipping expired entry");
        }
        Some(entry) => return Ok(Some(entry)),
        None => {}
      }
    }
    Ok(None)
  }

  /// Store a copy of `response` under `key`. The response itself stays with
  /// the caller.
  pub fn put(&self, handle: &CacheHandle, key: &str, response: &Response) -> Result<()> {
    self.put_stamped(handle, key, response, Utc::now(), None)
  }

  /// Like [`CacheStore::put`], limiting how long the entry may be served.
  pub fn put_with_ttl(
    &self,
    handle: &CacheHandle,
    key: &str,
    response: &Response,
    ttl: Duration,
  ) -> Result<()> {
    self.put_stamped(handle, key, response, Utc::now(), Some(ttl))
  }

  pub(crate) fn put_stamped(
    &self,
    handle: &CacheHandle,
    key: &str,
    response: &Response,
    stored_at: DateTime<Utc>,
    ttl: Option<Duration>,
  ) -> Result<()> {
    let entry = CacheEntry {
      request_key: key.to_string(),
      response: response.snapshot(),
      stored_at,
      ttl,
    };
    self.storage.put(&handle.name, &entry)?;
    debug!(partition = %handle.name, key, "cached");
    Ok(())
  }

  /// Store every response or none of them.
  pub fn put_all<'a>(
    &self,
    handle: &CacheHandle,
    items: impl IntoIterator<Item = (&'a str, &'a Response)>,
  ) -> Result<usize> {
    let now = Utc::now();
    let entries: Vec<CacheEntry> = items
      .into_iter()
      .map(|(key, response)| CacheEntry {
        request_key: key.to_string(),
        response: response.snapshot(),
        stored_at: now,
        ttl: None,
      })
      .collect();

    self.storage.put_all(&handle.name, &entries)?;
    Ok(entries.len())
  }

  /// Delete every partition whose name is not in `allowed`.
  ///
  /// Each partition goes in one step, so a failure part-way leaves whole
  /// partitions behind, never half-emptied ones. Returns the deleted names.
  pub fn prune(&self, allowed: &[String]) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.partitions()? {
      if allowed.contains(&name) {
        continue;
      }
      if self.storage.delete_partition(&name)? {
        info!(partition = %name, "deleted outdated cache partition");
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Names of all partitions.
  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.partitions()
  }

  pub fn delete(&self, name: &str) -> Result<bool> {
    self.storage.delete_partition(name)
  }

  /// Request keys cached in a partition.
  pub fn entries(&self, handle: &CacheHandle) -> Result<Vec<String>> {
    self.storage.keys(&handle.name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;

  fn stores() -> Vec<CacheStore> {
    vec![
      CacheStore::in_memory(),
      CacheStore::new(SqliteStorage::new(Database::in_memory().unwrap())),
    ]
  }

  #[test]
  fn test_put_then_match() {
    for store in stores() {
      let handle = store.open("dynamic").unwrap();
      let response = Response::new(200, "listing");
      store.put(&handle, "https://a.test/l/1", &response).unwrap();

      let entry = store.match_entry(&handle, "https://a.test/l/1").unwrap().unwrap();
      assert_eq!(entry.response.body, b"listing");
      assert!(entry.ttl.is_none());
      assert!(store.match_entry(&handle, "https://a.test/l/2").unwrap().is_none());
    }
  }

  #[test]
  fn test_match_any_respects_order() {
    let store = CacheStore::in_memory();
    let first = store.open("first").unwrap();
    let second = store.open("second").unwrap();
    store.put(&second, "k", &Response::new(200, "second")).unwrap();
    store.put(&first, "k", &Response::new(200, "first")).unwrap();

    let hit = store.match_any(&[first, second], "k", Utc::now()).unwrap().unwrap();
    assert_eq!(hit.response.body, b"first");
  }

  #[test]
  fn test_match_any_skips_expired() {
    let store = CacheStore::in_memory();
    let api = store.open("api").unwrap();
    let dynamic = store.open("dynamic").unwrap();
    let stored = Utc::now() - Duration::hours(3);
    store
      .put_stamped(&api, "k", &Response::new(200, "old"), stored, Some(Duration::minutes(5)))
      .unwrap();
    let handles = [api, dynamic.clone()];

    assert!(store.match_any(&handles, "k", Utc::now()).unwrap().is_none());
    assert!(store.match_any(&handles, "k", stored).unwrap().is_some());

    store.put(&dynamic, "k", &Response::new(200, "plain")).unwrap();
    let hit = store.match_any(&handles, "k", Utc::now()).unwrap().unwrap();
    assert_eq!(hit.response.body, b"plain");
  }

  #[test]
  fn test_prune_keeps_allowed_and_is_idempotent() {
    for store in stores() {
      store.open("hs-static-v1").unwrap();
      store.open("hs-dynamic-v1").unwrap();
      let current = store.open("hs-static-v2").unwrap();
      store.put(&current, "k", &Response::new(200, "v2")).unwrap();

      let allowed = vec!["hs-static-v2".to_string()];
      let mut deleted = store.prune(&allowed).unwrap();
      deleted.sort();
      assert_eq!(deleted, vec!["hs-dynamic-v1", "hs-static-v1"]);
      assert_eq!(store.keys().unwrap(), vec!["hs-static-v2"]);
      assert!(store.match_entry(&current, "k").unwrap().is_some());

      assert!(store.prune(&allowed).unwrap().is_empty());
    }
  }

  #[test]
  fn test_put_all_counts_entries() {
    for store in stores() {
      let handle = store.open("static").unwrap();
      let a = Response::new(200, "a");
      let b = Response::new(200, "b");
      let stored = store.put_all(&handle, [("/a", &a), ("/b", &b)]).unwrap();
      assert_eq!(stored, 2);
      assert_eq!(store.entries(&handle).unwrap(), vec!["/a", "/b"]);
    }
  }
}
