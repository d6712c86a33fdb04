//! The engine facade: one value owning every component, with one entry
//! point per host event.

use color_eyre::eyre::eyre;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheGeneration, CacheStore, Partitions};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::event::KeepAlive;
use crate::host::{Clients, Notifier};
use crate::lifecycle::{ActivationReport, Lifecycle, LifecycleState};
use crate::net::{Fetcher, Request, Response};
use crate::notification::{ClickOutcome, Notification, NotificationRouter};
use crate::router::{Route, Router};
use crate::strategy::Strategies;
use crate::sync::{DrainReport, KeyValueStore, SyncQueue, SyncTask};

/// Everything the engine talks to.
pub struct Backends {
  pub cache: CacheStore,
  pub sync_store: Arc<dyn KeyValueStore>,
  pub network: Arc<dyn Fetcher>,
  pub clients: Arc<dyn Clients>,
  pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub assets: usize,
  /// Present when the engine activated straight away
  pub activation: Option<ActivationReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
  pub version: String,
  pub state: LifecycleState,
  /// Every partition with its entry count, current generation or not
  pub partitions: Vec<(String, usize)>,
  /// Queued tasks per sync tag
  pub pending: Vec<(String, usize)>,
}

pub struct Engine {
  cache: CacheStore,
  router: Router,
  strategies: Strategies,
  lifecycle: Lifecycle,
  sync: SyncQueue,
  notifications: NotificationRouter,
  keep_alive: KeepAlive,
  skip_waiting: bool,
}

impl Engine {
  pub fn new(config: &Config, backends: Backends) -> color_eyre::Result<Self> {
    let origin = config.origin_url()?;
    let generation = CacheGeneration::new(&config.cache_prefix, &config.version);
    let partitions = Partitions::open(&backends.cache, &generation)?;
    let keep_alive = KeepAlive::new();

    let router = Router::new(
      origin.clone(),
      config.routes.clone(),
      config.deny_hosts.clone(),
      config.external_api_hosts.clone(),
    );
    let strategies = Strategies::new(
      backends.cache.clone(),
      backends.network.clone(),
      partitions.clone(),
      keep_alive.clone(),
      origin.clone(),
      config.api_ttl(),
      config.offline_page.clone(),
    );
    let lifecycle = Lifecycle::new(
      backends.cache.clone(),
      backends.network.clone(),
      backends.clients.clone(),
      generation,
      partitions,
      origin.clone(),
      config.static_assets.clone(),
    )
    .map_err(|e| eyre!("Failed to prepare lifecycle: {}", e))?;
    let sync = SyncQueue::new(
      backends.sync_store,
      backends.network,
      origin.clone(),
      config.sync_queues.clone(),
    );
    let notifications = NotificationRouter::new(
      config.notifications.clone(),
      origin,
      backends.notifier,
      backends.clients,
    );

    Ok(Self {
      cache: backends.cache,
      router,
      strategies,
      lifecycle,
      sync,
      notifications,
      keep_alive,
      skip_waiting: config.skip_waiting,
    })
  }

  pub fn keep_alive(&self) -> &KeepAlive {
    &self.keep_alive
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  /// Seed the new generation; with `skip_waiting` it activates right away.
  pub async fn install(&self) -> Result<InstallReport> {
    let assets = self.lifecycle.install().await?;
    let activation = if self.skip_waiting {
      Some(self.lifecycle.activate().await?)
    } else {
      info!("installed; waiting for activation");
      None
    };
    Ok(InstallReport { assets, activation })
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    self.lifecycle.activate().await
  }

  pub async fn handle_fetch(&self, request: &Request) -> Result<Response> {
    match self.router.route(request) {
      Route::Bypass(reason) => {
        debug!(url = %request.url, ?reason, "bypassing engine");
        self.strategies.passthrough(request).await
      }
      Route::Handle {
        class,
        strategy,
        partition,
      } => {
        debug!(url = %request.url, ?class, %strategy, "routing request");
        self.strategies.execute(strategy, partition, request).await
      }
    }
  }

  pub async fn handle_push(&self, payload: Option<&[u8]>) -> Notification {
    self.notifications.on_push(payload).await
  }

  pub async fn handle_notification_click(
    &self,
    notification: &Notification,
    action: Option<&str>,
  ) -> Result<ClickOutcome> {
    self.notifications.on_click(notification, action).await
  }

  /// Connectivity returned for the queue registered under `tag`.
  pub async fn handle_sync(&self, tag: &str) -> Result<DrainReport> {
    self.sync.drain_tag(tag).await
  }

  /// Queue a mutation that failed to reach the origin.
  pub async fn enqueue(&self, tag: &str, payload: Value) -> Result<SyncTask> {
    let task_type = self
      .sync
      .queue_for_tag(tag)
      .map(|q| q.task_type.clone())
      .ok_or_else(|| EngineError::UnknownSyncTag(tag.to_string()))?;
    self.sync.enqueue(&task_type, payload).await
  }

  pub async fn status(&self) -> Result<Status> {
    let mut partitions = Vec::new();
    for name in self.cache.keys().map_err(EngineError::Storage)? {
      let handle = self.cache.open(&name).map_err(EngineError::Storage)?;
      let count = self.cache.entries(&handle).map_err(EngineError::Storage)?.len();
      partitions.push((name, count));
    }

    let mut pending = Vec::new();
    for queue in self.sync.queues() {
      pending.push((queue.tag.clone(), self.sync.pending(&queue.task_type).await?.len()));
    }

    Ok(Status {
      version: self.lifecycle.generation().version().to_string(),
      state: self.lifecycle.state(),
      partitions,
      pending,
    })
  }
}
