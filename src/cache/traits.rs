//! Core types for cached responses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::net::{Headers, Response, ResponseSource};

/// Stored copy of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl CachedResponse {
  pub fn into_response(self, source: ResponseSource) -> Response {
    Response::from_parts(self.status, self.headers, self.body, source)
  }
}

/// A single cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Request key (URL without fragment)
  pub request_key: String,
  pub response: CachedResponse,
  /// When the engine stored the entry. Upstream `Date` headers are ignored.
  pub stored_at: DateTime<Utc>,
  /// How long the entry may serve as a fallback, if limited
  pub ttl: Option<Duration>,
}

impl CacheEntry {
  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.stored_at
  }

  /// Whether the entry is still young enough, using `default_ttl` when the
  /// entry carries none.
  pub fn is_fresh(&self, now: DateTime<Utc>, default_ttl: Duration) -> bool {
    self.age(now) < self.ttl.unwrap_or(default_ttl)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(stored_at: DateTime<Utc>, ttl: Option<Duration>) -> CacheEntry {
    CacheEntry {
      request_key: "https://app.example.com/api/x".into(),
      response: CachedResponse {
        status: 200,
        headers: Headers::new(),
        body: b"{}".to_vec(),
      },
      stored_at,
      ttl,
    }
  }

  #[test]
  fn test_freshness_boundary_is_exclusive() {
    let now = Utc::now();
    let ttl = Duration::minutes(5);

    assert!(entry(now - Duration::milliseconds(299_999), Some(ttl)).is_fresh(now, ttl));
    assert!(!entry(now - Duration::milliseconds(300_000), Some(ttl)).is_fresh(now, ttl));
  }

  #[test]
  fn test_entry_ttl_overrides_default() {
    let now = Utc::now();
    let e = entry(now - Duration::minutes(2), Some(Duration::minutes(1)));
    assert!(!e.is_fresh(now, Duration::minutes(5)));

    let e = entry(now - Duration::minutes(2), None);
    assert!(e.is_fresh(now, Duration::minutes(5)));
  }
}
