use tracing::debug;

use crate::cache::PartitionKind;
use crate::error::Result;
use crate::net::{Request, Response, ResponseSource};

use super::Strategies;

impl Strategies {
  /// Serve a cached match without touching the network. On a miss, fetch,
  /// keep a copy in `partition` and return the response; a network failure
  /// propagates.
  pub async fn cache_first(&self, request: &Request, partition: PartitionKind) -> Result<Response> {
    let key = request.cache_key();

    if let Some(entry) = self.lookup(&key) {
      debug!(key = %key, "cache hit");
      return Ok(entry.response.into_response(ResponseSource::Cache));
    }

    let response = self.network.fetch(request).await?;
    if Self::is_cacheable(request, &response) {
      self.store(partition, &key, &response, None);
    }
    Ok(response)
  }
}
