use tracing::{debug, warn};

use crate::cache::PartitionKind;
use crate::error::{EngineError, NetworkError, Result};
use crate::net::{Request, Response, ResponseSource};

use super::Strategies;

impl Strategies {
  /// Serve the cached copy immediately and refresh it in the background.
  ///
  /// The revalidation is always started and registered with the keep-alive
  /// tracker. The caller waits on it only when nothing was cached, so it
  /// never blocks on both paths. Only same-origin responses are written back.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
    partition: PartitionKind,
  ) -> Result<Response> {
    let key = request.cache_key();
    let cached = self.lookup(&key);

    let revalidation = {
      let this = self.clone();
      let request = request.clone();
      let key = key.clone();
      self.keep_alive.spawn(async move {
        let response = match this.network.fetch(&request).await {
          Ok(response) => response,
          Err(err) => {
            warn!(key = %key, error = %err, "background revalidation failed");
            return Err(err);
          }
        };
        if Self::is_cacheable(&request, &response) && request.is_same_origin(&this.origin) {
          this.store(partition, &key, &response, None);
        }
        Ok::<_, NetworkError>(response)
      })
    };

    if let Some(entry) = cached {
      debug!(key = %key, "serving cached copy while revalidating");
      return Ok(entry.response.into_response(ResponseSource::Cache));
    }

    let err = match revalidation.await {
      Ok(Ok(response)) => return Ok(response),
      Ok(Err(err)) => err,
      Err(join_err) => {
        warn!(key = %key, error = %join_err, "revalidation task aborted");
        NetworkError::Transport(join_err.to_string())
      }
    };

    // Another request may have filled the cache meanwhile
    match self.lookup(&key) {
      Some(entry) => Ok(entry.response.into_response(ResponseSource::Offline)),
      None => Err(EngineError::Network(err)),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io;
  use std::sync::{Arc, Mutex};
  use std::time::Duration;

  use crate::cache::PartitionKind;
  use crate::error::{EngineError, NetworkError};
  use crate::net::{Destination, Request, Response, ResponseSource};
  use crate::testing::{fixture, url};

  #[tokio::test]
  async fn test_returns_cached_without_waiting_for_network() {
    let fx = fixture();
    let script = url("/static/app.js");
    let handle = fx.strategies.partitions.get(PartitionKind::Dynamic);
    fx.cache.put(handle, script.as_str(), &Response::new(200, "old js")).unwrap();

    // The network never answers
    fx.network.hang(true);

    let request = Request::get(script.clone()).with_destination(Destination::Script);
    let response = tokio::time::timeout(
      Duration::from_secs(1),
      fx.strategies.stale_while_revalidate(&request, PartitionKind::Dynamic),
    )
    .await
    .expect("must not wait on the network")
    .unwrap();

    assert_eq!(response.text(), "old js");
    assert_eq!(response.source(), ResponseSource::Cache);
    assert_eq!(fx.keep_alive.pending(), 1);
  }

  #[tokio::test]
  async fn test_background_refresh_updates_cache() {
    let fx = fixture();
    let style = url("/static/site.css");
    let handle = fx.strategies.partitions.get(PartitionKind::Dynamic).clone();
    fx.cache.put(&handle, style.as_str(), &Response::new(200, "old css")).unwrap();
    fx.network.respond(&style, 200, "new css");

    let request = Request::get(style.clone());
    let response = fx
      .strategies
      .stale_while_revalidate(&request, PartitionKind::Dynamic)
      .await
      .unwrap();
    assert_eq!(response.text(), "old css");

    fx.keep_alive.settle().await;
    let entry = fx.cache.match_entry(&handle, style.as_str()).unwrap().unwrap();
    assert_eq!(entry.response.body, b"new css");
  }

  #[derive(Clone, Default)]
  struct LogBuffer(Arc<Mutex<Vec<u8>>>);

  impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_failed_revalidation_is_logged() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
      .with_writer(move || writer.clone())
      .with_ansi(false)
      .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let fx = fixture();
    let script = url("/static/vendor.js");
    let handle = fx.strategies.partitions.get(PartitionKind::Dynamic);
    fx.cache.put(handle, script.as_str(), &Response::new(200, "vendor")).unwrap();
    fx.network.set_offline(true);

    let response = fx
      .strategies
      .stale_while_revalidate(&Request::get(script), PartitionKind::Dynamic)
      .await
      .unwrap();
    assert_eq!(response.source(), ResponseSource::Cache);

    fx.keep_alive.settle().await;
    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("background revalidation failed"), "{}", output);
  }

  #[tokio::test]
  async fn test_miss_waits_for_network() {
    let fx = fixture();
    let style = url("/static/print.css");
    fx.network.respond(&style, 200, "print css");

    let response = fx
      .strategies
      .stale_while_revalidate(&Request::get(style), PartitionKind::Dynamic)
      .await
      .unwrap();
    assert_eq!(response.text(), "print css");
    assert_eq!(response.source(), ResponseSource::Network);
  }

  #[tokio::test]
  async fn test_miss_while_offline_errors() {
    let fx = fixture();
    fx.network.set_offline(true);

    let err = fx
      .strategies
      .stale_while_revalidate(&Request::get(url("/static/none.js")), PartitionKind::Dynamic)
      .await
      .unwrap_err();
    assert!(matches!(err, EngineError::Network(NetworkError::Offline)));
  }

  #[tokio::test]
  async fn test_cross_origin_is_never_cached() {
    let fx = fixture();
    let cdn = url::Url::parse("https://cdn.example.net/lib.js").unwrap();
    fx.network.respond(&cdn, 200, "lib");

    let request = Request::get(cdn.clone());
    fx.strategies
      .stale_while_revalidate(&request, PartitionKind::Dynamic)
      .await
      .unwrap();
    fx.keep_alive.settle().await;

    let handle = fx.strategies.partitions.get(PartitionKind::Dynamic);
    assert!(fx.cache.match_entry(handle, cdn.as_str()).unwrap().is_none());
  }
}
