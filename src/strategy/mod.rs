//! Cache strategy executors.
//!
//! Each strategy composes cache store operations with one network call:
//! - `CacheFirst`: serve a cached match, fetch only on a miss
//! - `NetworkFirst`: fetch, fall back to cache, then to the offline page for navigations
//! - `StaleWhileRevalidate`: serve the cached copy now, refresh it in the background
//! - `NetworkFirstWithTtl`: fetch, fall back to cache only while younger than the TTL
//!
//! Cache writes are best effort everywhere: a failed write is logged and the
//! response still goes to the caller.

mod cache_first;
mod network_first;
mod network_first_ttl;
mod stale_while_revalidate;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::cache::{CacheEntry, CacheStore, PartitionKind, Partitions};
use crate::error::{EngineError, Result};
use crate::event::KeepAlive;
use crate::net::{Fetcher, Request, Response, ResponseSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
  NetworkFirstWithTtl,
}

impl fmt::Display for StrategyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      StrategyKind::CacheFirst => "cache-first",
      StrategyKind::NetworkFirst => "network-first",
      StrategyKind::StaleWhileRevalidate => "stale-while-revalidate",
      StrategyKind::NetworkFirstWithTtl => "network-first-with-ttl",
    };
    f.write_str(name)
  }
}

/// Shared state for all strategy executors. Cheap to clone.
#[derive(Clone)]
pub struct Strategies {
  cache: CacheStore,
  network: Arc<dyn Fetcher>,
  partitions: Partitions,
  keep_alive: KeepAlive,
  origin: Url,
  api_ttl: Duration,
  offline_page: String,
}

impl Strategies {
  pub fn new(
    cache: CacheStore,
    network: Arc<dyn Fetcher>,
    partitions: Partitions,
    keep_alive: KeepAlive,
    origin: Url,
    api_ttl: Duration,
    offline_page: String,
  ) -> Self {
    Self {
      cache,
      network,
      partitions,
      keep_alive,
      origin,
      api_ttl,
      offline_page,
    }
  }

  pub async fn execute(
    &self,
    kind: StrategyKind,
    partition: PartitionKind,
    request: &Request,
  ) -> Result<Response> {
    match kind {
      StrategyKind::CacheFirst => self.cache_first(request, partition).await,
      StrategyKind::NetworkFirst => self.network_first(request, partition).await,
      StrategyKind::StaleWhileRevalidate => self.stale_while_revalidate(request, partition).await,
      StrategyKind::NetworkFirstWithTtl => self.network_first_with_ttl(request, partition).await,
    }
  }

  /// Plain network call for requests the engine does not handle.
  pub async fn passthrough(&self, request: &Request) -> Result<Response> {
    Ok(self.network.fetch(request).await?)
  }

  /// Match across the current generation. A failing read counts as a miss,
  /// and so does an entry whose own TTL has run out.
  fn lookup(&self, key: &str) -> Option<CacheEntry> {
    match self.cache.match_any(self.partitions.all(), key, Utc::now()) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(key, error = %e, "cache read failed; treating as miss");
        None
      }
    }
  }

  /// Best-effort write. Never fails the response.
  fn store(&self, partition: PartitionKind, key: &str, response: &Response, ttl: Option<Duration>) {
    let handle = self.partitions.get(partition);
    let result = match ttl {
      Some(ttl) => self.cache.put_with_ttl(handle, key, response, ttl),
      None => self.cache.put(handle, key, response),
    };
    if let Err(e) = result {
      let err = EngineError::CacheWrite(e);
      warn!(partition = %handle.name(), key, error = %err, "swallowed cache write failure");
    }
  }

  /// Only successful responses over http(s) are worth keeping.
  fn is_cacheable(request: &Request, response: &Response) -> bool {
    response.ok() && matches!(request.url.scheme(), "http" | "https")
  }

  /// Navigation fallback: the cached offline page, else the built-in one.
  fn offline_response(&self) -> Response {
    let key = match self.origin.join(&self.offline_page) {
      Ok(url) => url.to_string(),
      Err(_) => return Response::offline_placeholder(),
    };
    let handle = self.partitions.get(PartitionKind::Static);
    match self.cache.match_entry(handle, &key) {
      Ok(Some(entry)) => entry.response.into_response(ResponseSource::Placeholder),
      _ => Response::offline_placeholder(),
    }
  }
}
