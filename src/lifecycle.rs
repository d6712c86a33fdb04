//! Install and activation of one cache generation.
//!
//! ```text
//! Parsed -> Installing -> Waiting -> Activating -> Active
//!              |
//!              +-> Redundant (install failed; a later install starts over)
//! ```

use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheGeneration, CacheStore, PartitionKind, Partitions};
use crate::error::{EngineError, Result};
use crate::host::Clients;
use crate::net::{Fetcher, Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Parsed,
  Installing,
  /// Installed, old generation still in charge
  Waiting,
  Activating,
  Active,
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LifecycleState::Parsed => "parsed",
      LifecycleState::Installing => "installing",
      LifecycleState::Waiting => "waiting",
      LifecycleState::Activating => "activating",
      LifecycleState::Active => "active",
      LifecycleState::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  /// Partitions of earlier generations that were evicted
  pub deleted: Vec<String>,
  /// Open clients now governed by this generation
  pub claimed: usize,
}

pub struct Lifecycle {
  cache: CacheStore,
  network: Arc<dyn Fetcher>,
  clients: Arc<dyn Clients>,
  generation: CacheGeneration,
  partitions: Partitions,
  origin: Url,
  manifest: Vec<String>,
  state: watch::Sender<LifecycleState>,
  // Serializes install/activate against each other
  transition: Mutex<()>,
}

impl Lifecycle {
  /// A generation whose static partition is already seeded (by an earlier
  /// process) starts out `Waiting`; otherwise it starts `Parsed`.
  pub fn new(
    cache: CacheStore,
    network: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
    generation: CacheGeneration,
    partitions: Partitions,
    origin: Url,
    manifest: Vec<String>,
  ) -> Result<Self> {
    let seeded = cache
      .entries(partitions.get(PartitionKind::Static))
      .map_err(EngineError::Storage)?;
    let initial = if !manifest.is_empty() && seeded.len() >= manifest.len() {
      LifecycleState::Waiting
    } else {
      LifecycleState::Parsed
    };
    let (state, _) = watch::channel(initial);

    Ok(Self {
      cache,
      network,
      clients,
      generation,
      partitions,
      origin,
      manifest,
      state,
      transition: Mutex::new(()),
    })
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
    self.state.subscribe()
  }

  pub fn generation(&self) -> &CacheGeneration {
    &self.generation
  }

  fn set_state(&self, next: LifecycleState) {
    let prev = self.state.send_replace(next);
    if prev != next {
      info!(version = %self.generation.version(), from = %prev, to = %next, "lifecycle transition");
    }
  }

  /// Fetch every manifest asset and seed the static partition with all of
  /// them in one write. A single failed asset fails the install and nothing
  /// is stored. Returns the number of assets cached.
  ///
  /// Installing again while active only refreshes the static partition;
  /// the generation keeps serving whether or not the refresh succeeds.
  pub async fn install(&self) -> Result<usize> {
    let _guard = self.transition.lock().await;
    if self.state() == LifecycleState::Active {
      return self.seed_static().await.inspect_err(|err| {
        warn!(error = %err, "static refresh failed; staying active");
      });
    }
    self.set_state(LifecycleState::Installing);

    match self.seed_static().await {
      Ok(count) => {
        self.set_state(LifecycleState::Waiting);
        Ok(count)
      }
      Err(err) => {
        warn!(error = %err, "install failed");
        self.set_state(LifecycleState::Redundant);
        Err(err)
      }
    }
  }

  async fn seed_static(&self) -> Result<usize> {
    let requests = self
      .manifest
      .iter()
      .map(|asset| {
        self
          .origin
          .join(asset)
          .map(Request::get)
          .map_err(|e| EngineError::InstallAssetFetch {
            url: asset.clone(),
            reason: e.to_string(),
          })
      })
      .collect::<Result<Vec<_>>>()?;

    let responses = try_join_all(requests.iter().map(|request| self.fetch_asset(request))).await?;

    let keys: Vec<String> = requests.iter().map(Request::cache_key).collect();
    let items = keys.iter().map(String::as_str).zip(responses.iter());
    self
      .cache
      .put_all(self.partitions.get(PartitionKind::Static), items)
      .map_err(EngineError::Storage)
  }

  async fn fetch_asset(&self, request: &Request) -> Result<Response> {
    let response = self
      .network
      .fetch(request)
      .await
      .map_err(|e| EngineError::InstallAssetFetch {
        url: request.url.to_string(),
        reason: e.to_string(),
      })?;

    if !response.ok() {
      return Err(EngineError::InstallAssetFetch {
        url: request.url.to_string(),
        reason: format!("status {}", response.status()),
      });
    }
    debug!(url = %request.url, "fetched install asset");
    Ok(response)
  }

  /// Evict every partition outside the current generation, then claim open
  /// clients. Running it again once active only re-checks; nothing is left
  /// to delete.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let _guard = self.transition.lock().await;
    let current = self.state();
    match current {
      LifecycleState::Waiting | LifecycleState::Active => {}
      other => {
        return Err(EngineError::InvalidTransition {
          action: "activate",
          state: other.to_string(),
        })
      }
    }

    self.set_state(LifecycleState::Activating);
    let deleted = match self.cache.prune(&self.generation.partition_names()) {
      Ok(deleted) => deleted,
      Err(e) => {
        // Whole partitions only, so retrying later is safe
        self.set_state(current);
        return Err(EngineError::Storage(e));
      }
    };

    let claimed = self.clients.claim().await;
    self.set_state(LifecycleState::Active);
    info!(deleted = deleted.len(), claimed, "activated");
    Ok(ActivationReport { deleted, claimed })
  }
}
