use color_eyre::Result;
use serde::{Deserialize, Serialize};

use super::store::{CacheHandle, CacheStore};

/// The partitions every generation owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
  /// Install-time manifest
  Static,
  Images,
  Dynamic,
  /// TTL-stamped external API responses
  Api,
}

impl PartitionKind {
  /// Lookup order for requests that may be served from any partition.
  pub const ALL: [PartitionKind; 4] = [
    PartitionKind::Static,
    PartitionKind::Images,
    PartitionKind::Dynamic,
    PartitionKind::Api,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      PartitionKind::Static => "static",
      PartitionKind::Images => "images",
      PartitionKind::Dynamic => "dynamic",
      PartitionKind::Api => "api",
    }
  }

  fn index(&self) -> usize {
    match self {
      PartitionKind::Static => 0,
      PartitionKind::Images => 1,
      PartitionKind::Dynamic => 2,
      PartitionKind::Api => 3,
    }
  }
}

/// One deployed version's set of partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  prefix: String,
  version: String,
}

impl CacheGeneration {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// e.g. `homesync-static-v3`
  pub fn partition_name(&self, kind: PartitionKind) -> String {
    format!("{}-{}-{}", self.prefix, kind.as_str(), self.version)
  }

  /// Allow-list used when pruning at activation.
  pub fn partition_names(&self) -> Vec<String> {
    PartitionKind::ALL
      .iter()
      .map(|kind| self.partition_name(*kind))
      .collect()
  }
}

/// Open handles to the current generation's partitions.
#[derive(Debug, Clone)]
pub struct Partitions {
  handles: [CacheHandle; 4],
}

impl Partitions {
  pub fn open(store: &CacheStore, generation: &CacheGeneration) -> Result<Self> {
    Ok(Self {
      handles: [
        store.open(&generation.partition_name(PartitionKind::Static))?,
        store.open(&generation.partition_name(PartitionKind::Images))?,
        store.open(&generation.partition_name(PartitionKind::Dynamic))?,
        store.open(&generation.partition_name(PartitionKind::Api))?,
      ],
    })
  }

  pub fn get(&self, kind: PartitionKind) -> &CacheHandle {
    &self.handles[kind.index()]
  }

  /// Handles in [`PartitionKind::ALL`] order.
  pub fn all(&self) -> &[CacheHandle] {
    &self.handles
  }
}
