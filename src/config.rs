use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::notification::NotificationDefaults;
use crate::router::{default_rules, RouteRule};
use crate::sync::{default_queues, SyncQueueConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Application origin every relative path is resolved against
  pub origin: String,
  /// First component of every partition name
  pub cache_prefix: String,
  /// Generation tag; bump it on every deployment
  pub version: String,
  /// Install manifest, relative to `origin`
  pub static_assets: Vec<String>,
  pub offline_page: String,
  /// Activate right after install instead of waiting
  pub skip_waiting: bool,
  /// Freshness window for external API responses
  pub api_ttl_secs: u64,
  pub request_timeout_secs: u64,
  /// Third-party API hosts (subdomains included)
  pub external_api_hosts: Vec<String>,
  /// Analytics/tracking hosts the engine never touches
  pub deny_hosts: Vec<String>,
  pub routes: Vec<RouteRule>,
  pub sync_queues: Vec<SyncQueueConfig>,
  pub notifications: NotificationDefaults,
  /// SQLite file (defaults to the user data dir)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      cache_prefix: "homesync".to_string(),
      version: "v1".to_string(),
      static_assets: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/manifest.json".to_string(),
        "/icons/icon-192x192.png".to_string(),
        "/icons/icon-512x512.png".to_string(),
      ],
      offline_page: "/offline.html".to_string(),
      skip_waiting: true,
      api_ttl_secs: 300,
      request_timeout_secs: 30,
      external_api_hosts: vec!["maps.googleapis.com".to_string(), "api.openai.com".to_string()],
      deny_hosts: vec![
        "google-analytics.com".to_string(),
        "googletagmanager.com".to_string(),
        "doubleclick.net".to_string(),
        "sentry.io".to_string(),
      ],
      routes: default_rules(),
      sync_queues: default_queues(),
      notifications: NotificationDefaults::default(),
      database: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./homesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/homesync/config.yaml
  ///
  /// Without any file the built-in defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("homesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("homesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not to an empty map
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.cache_prefix.is_empty() || self.version.is_empty() {
      return Err(eyre!("cache_prefix and version must not be empty"));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  pub fn api_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.api_ttl_secs as i64)
  }

  pub fn request_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.request_timeout_secs)
  }
}
