//! Error taxonomy for the engine.
//!
//! A cache miss is not an error: lookups return `Option`. Everything that
//! can escape a handler is an [`EngineError`]; the variants that must never
//! reach the caller (cache writes, malformed pushes) are still modelled so
//! they can be logged with a consistent shape.

use thiserror::Error;

/// Failure to get any response from the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  #[error("network unreachable")]
  Offline,

  #[error("request timed out")]
  Timeout,

  #[error("transport error: {0}")]
  Transport(String),

  #[error("invalid url: {0}")]
  InvalidUrl(String),
}

impl From<reqwest::Error> for NetworkError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      NetworkError::Timeout
    } else if err.is_connect() {
      NetworkError::Offline
    } else {
      NetworkError::Transport(err.to_string())
    }
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  /// A manifest asset could not be fetched; the whole install fails.
  #[error("install failed fetching {url}: {reason}")]
  InstallAssetFetch { url: String, reason: String },

  #[error(transparent)]
  Network(#[from] NetworkError),

  /// Never returned from a strategy, only logged.
  #[error("cache write failed: {0}")]
  CacheWrite(color_eyre::Report),

  /// The task stays queued for the next connectivity event.
  #[error("replay of sync task {task_id} failed: {reason}")]
  SyncReplay { task_id: String, reason: String },

  /// Recovered by plain-text degradation.
  #[error("malformed push payload: {0}")]
  MalformedPushPayload(#[from] serde_json::Error),

  #[error("no sync queue registered for tag {0}")]
  UnknownSyncTag(String),

  #[error("storage error: {0}")]
  Storage(color_eyre::Report),

  #[error("cannot {action} while {state}")]
  InvalidTransition { action: &'static str, state: String },

  /// The event loop stopped before answering.
  #[error("event loop closed")]
  EventLoopClosed,
}

impl EngineError {
  /// Whether a later attempt may succeed without any intervention.
  pub fn is_recoverable(&self) -> bool {
    matches!(
      self,
      EngineError::Network(_)
        | EngineError::SyncReplay { .. }
        | EngineError::CacheWrite(_)
        | EngineError::MalformedPushPayload(_)
    )
  }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_recoverable_classification() {
    assert!(EngineError::Network(NetworkError::Offline).is_recoverable());
    assert!(EngineError::SyncReplay {
      task_id: "t".into(),
      reason: "503".into()
    }
    .is_recoverable());
    assert!(!EngineError::InstallAssetFetch {
      url: "/app.js".into(),
      reason: "404".into()
    }
    .is_recoverable());
    assert!(!EngineError::UnknownSyncTag("x".into()).is_recoverable());
  }

  #[test]
  fn test_network_error_is_transparent() {
    let err = EngineError::from(NetworkError::Offline);
    assert_eq!(err.to_string(), "network unreachable");
  }
}
