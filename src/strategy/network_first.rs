use tracing::debug;

use crate::cache::PartitionKind;
use crate::error::Result;
use crate::net::{Request, Response, ResponseSource};

use super::Strategies;

impl Strategies {
  /// Fetch first and keep a copy. When the network fails, serve the cached
  /// match; navigations with nothing cached get the offline page, anything
  /// else gets the network error.
  pub async fn network_first(&self, request: &Request, partition: PartitionKind) -> Result<Response> {
    let key = request.cache_key();

    match self.network.fetch(request).await {
      Ok(response) => {
        if Self::is_cacheable(request, &response) {
          self.store(partition, &key, &response, None);
        }
        Ok(response)
      }
      Err(err) => {
        if let Some(entry) = self.lookup(&key) {
          debug!(key = %key, error = %err, "network failed; serving cached copy");
          return Ok(entry.response.into_response(ResponseSource::Offline));
        }
        if request.is_navigation() {
          debug!(key = %key, error = %err, "network failed; serving offline page");
          return Ok(self.offline_response());
        }
        Err(err.into())
      }
    }
  }
}
