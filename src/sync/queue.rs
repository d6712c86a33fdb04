use chrono::{DateTime, SubsecRound, Utc};
use color_eyre::eyre::eyre;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::net::{Fetcher, Request};

use super::store::KeyValueStore;

/// Header carrying the task id, so the origin can drop duplicate replays.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Maps a sync registration tag to the queue it drains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueConfig {
  pub tag: String,
  pub task_type: String,
  /// Origin-relative endpoint tasks are replayed against
  pub endpoint: String,
}

pub fn default_queues() -> Vec<SyncQueueConfig> {
  vec![
    SyncQueueConfig {
      tag: "background-sync-search".to_string(),
      task_type: "search".to_string(),
      endpoint: "/api/search".to_string(),
    },
    SyncQueueConfig {
      tag: "background-sync-user-data".to_string(),
      task_type: "user-data".to_string(),
      endpoint: "/api/user/sync".to_string(),
    },
  ]
}

/// A deferred mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
  /// Client-generated, stable across replays
  pub id: Uuid,
  pub task_type: String,
  pub endpoint: String,
  pub payload: Value,
  pub created_at: DateTime<Utc>,
  pub attempts: u32,
}

impl SyncTask {
  /// Store key: task type, then creation time, so a prefix scan returns
  /// tasks oldest first.
  fn key(&self) -> String {
    format!(
      "{}:{:016}:{}",
      self.task_type,
      self.created_at.timestamp_micros(),
      self.id.simple()
    )
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Replayed and removed
  pub replayed: usize,
  /// Still queued after this drain
  pub remaining: usize,
  /// Task that stopped the drain
  pub failed: Option<Uuid>,
}

pub struct SyncQueue {
  store: Arc<dyn KeyValueStore>,
  network: Arc<dyn Fetcher>,
  origin: Url,
  queues: Vec<SyncQueueConfig>,
  // Creation stamps are strictly increasing within one queue
  last_created: Mutex<Option<DateTime<Utc>>>,
  // One drain at a time, whatever the tag
  draining: tokio::sync::Mutex<()>,
}

impl SyncQueue {
  pub fn new(
    store: Arc<dyn KeyValueStore>,
    network: Arc<dyn Fetcher>,
    origin: Url,
    queues: Vec<SyncQueueConfig>,
  ) -> Self {
    Self {
      store,
      network,
      origin,
      queues,
      last_created: Mutex::new(None),
      draining: tokio::sync::Mutex::new(()),
    }
  }

  pub fn queues(&self) -> &[SyncQueueConfig] {
    &self.queues
  }

  pub fn queue_for_tag(&self, tag: &str) -> Option<&SyncQueueConfig> {
    self.queues.iter().find(|q| q.tag == tag)
  }

  fn queue_for_type(&self, task_type: &str) -> Result<&SyncQueueConfig> {
    self
      .queues
      .iter()
      .find(|q| q.task_type == task_type)
      .ok_or_else(|| EngineError::UnknownSyncTag(task_type.to_string()))
  }

  /// Persist a failed mutation for later replay.
  pub async fn enqueue(&self, task_type: &str, payload: Value) -> Result<SyncTask> {
    let queue = self.queue_for_type(task_type)?;
    let task = SyncTask {
      id: Uuid::new_v4(),
      task_type: task_type.to_string(),
      endpoint: queue.endpoint.clone(),
      payload,
      created_at: self.next_created_at()?,
      attempts: 0,
    };

    self.write(&task.key(), &task).await?;
    info!(task_id = %task.id, task_type, "queued task for background sync");
    Ok(task)
  }

  fn next_created_at(&self) -> Result<DateTime<Utc>> {
    let mut last = self
      .last_created
      .lock()
      .map_err(|e| EngineError::Storage(eyre!("Lock poisoned: {}", e)))?;
    let now = Utc::now().trunc_subsecs(6);
    let stamp = match *last {
      Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
      _ => now,
    };
    *last = Some(stamp);
    Ok(stamp)
  }

  /// Queued tasks of one type, oldest first. Unreadable records are skipped.
  pub async fn pending(&self, task_type: &str) -> Result<Vec<SyncTask>> {
    Ok(self.load(task_type).await?.into_iter().map(|(_, task)| task).collect())
  }

  async fn load(&self, task_type: &str) -> Result<Vec<(String, SyncTask)>> {
    let keys = self
      .store
      .keys_with_prefix(&format!("{}:", task_type))
      .await
      .map_err(EngineError::Storage)?;

    let mut tasks = Vec::with_capacity(keys.len());
    for key in keys {
      let record = self.store.get(&key).await.map_err(EngineError::Storage)?;
      match record.map(serde_json::from_value::<SyncTask>) {
        Some(Ok(task)) => tasks.push((key, task)),
        Some(Err(e)) => warn!(key = %key, error = %e, "skipping unreadable sync record"),
        None => {}
      }
    }
    Ok(tasks)
  }

  /// Drain the queue registered under a sync tag.
  pub async fn drain_tag(&self, tag: &str) -> Result<DrainReport> {
    let task_type = self
      .queue_for_tag(tag)
      .map(|q| q.task_type.clone())
      .ok_or_else(|| EngineError::UnknownSyncTag(tag.to_string()))?;
    self.drain(&task_type).await
  }

  /// Replay queued tasks one at a time, oldest first.
  ///
  /// A task is deleted only after the origin confirmed it. The first failure
  /// stops the drain so later tasks never overtake it; everything from there
  /// on stays queued for the next connectivity event. Concurrent drains wait
  /// for each other and then start from what is still queued.
  pub async fn drain(&self, task_type: &str) -> Result<DrainReport> {
    let _draining = self.draining.lock().await;
    let tasks = self.load(task_type).await?;
    let total = tasks.len();
    let mut report = DrainReport {
      remaining: total,
      ..Default::default()
    };

    for (key, mut task) in tasks {
      if let Err(err) = self.replay(&task).await {
        warn!(task_id = %task.id, error = %err, "sync replay failed; task stays queued");
        if let Err(e) = self.record_attempt(&key, task.clone()).await {
          warn!(task_id = %task.id, error = %e, "failed to record replay attempt");
        }
        report.failed = Some(task.id);
        break;
      }

      self.store.delete(&key).await.map_err(EngineError::Storage)?;
      report.replayed += 1;
      report.remaining -= 1;
      debug!(task_id = %task.id, "replayed sync task");
    }

    info!(task_type, replayed = report.replayed, remaining = report.remaining, "sync drain finished");
    Ok(report)
  }

  async fn replay(&self, task: &SyncTask) -> Result<()> {
    let url = self.origin.join(&task.endpoint).map_err(|e| EngineError::SyncReplay {
      task_id: task.id.to_string(),
      reason: format!("bad endpoint {}: {}", task.endpoint, e),
    })?;

    let request = Request::post_json(url, &task.payload).with_header(IDEMPOTENCY_HEADER, task.id.to_string());
    let response = self.network.fetch(&request).await.map_err(|e| EngineError::SyncReplay {
      task_id: task.id.to_string(),
      reason: e.to_string(),
    })?;

    if !response.ok() {
      return Err(EngineError::SyncReplay {
        task_id: task.id.to_string(),
        reason: format!("status {}", response.status()),
      });
    }
    Ok(())
  }

  /// Bump the attempt count of a task that is still queued. A record that
  /// is gone was confirmed elsewhere and must not come back.
  async fn record_attempt(&self, key: &str, mut task: SyncTask) -> Result<()> {
    if self.store.get(key).await.map_err(EngineError::Storage)?.is_none() {
      debug!(task_id = %task.id, "task removed during replay; not recording attempt");
      return Ok(());
    }
    task.attempts += 1;
    self.write(key, &task).await
  }

  async fn write(&self, key: &str, task: &SyncTask) -> Result<()> {
    let data = serde_json::to_value(task).map_err(|e| EngineError::Storage(e.into()))?;
    self.store.put(key, &data).await.map_err(EngineError::Storage)
  }
}
