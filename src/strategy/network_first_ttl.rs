use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::PartitionKind;
use crate::error::Result;
use crate::net::{Request, Response, ResponseSource};

use super::Strategies;

impl Strategies {
  /// For external API responses: fetch first and stamp what comes back.
  ///
  /// On network failure a cached entry is served only while
  /// `now - stored_at` is under the TTL. Anything older is a miss and the
  /// original network error propagates, so stale API data is never served
  /// indefinitely.
  pub async fn network_first_with_ttl(
    &self,
    request: &Request,
    partition: PartitionKind,
  ) -> Result<Response> {
    let key = request.cache_key();

    let err = match self.network.fetch(request).await {
      Ok(response) => {
        if Self::is_cacheable(request, &response) {
          self.store(partition, &key, &response, Some(self.api_ttl));
        }
        return Ok(response);
      }
      Err(err) => err,
    };

    let handle = self.partitions.get(partition);
    match self.cache.match_entry(handle, &key) {
      Ok(Some(entry)) => {
        let now = Utc::now();
        if entry.is_fresh(now, self.api_ttl) {
          debug!(key = %key, age_ms = entry.age(now).num_milliseconds(), "network failed; serving fresh API copy");
          return Ok(entry.response.into_response(ResponseSource::Offline));
        }
        debug!(key = %key, age_ms = entry.age(now).num_milliseconds(), "cached API copy expired");
      }
      Ok(None) => {}
      Err(e) => warn!(key = %key, error = %e, "cache read failed; treating as miss"),
    }

    Err(err.into())
  }
}
