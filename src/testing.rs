//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheEntry, CacheGeneration, CacheStorage, CacheStore, MemoryStorage, Partitions};
use crate::error::NetworkError;
use crate::event::KeepAlive;
use crate::net::{Fetcher, Method, Request, Response};
use crate::strategy::Strategies;
use crate::sync::IDEMPOTENCY_HEADER;

pub const ORIGIN: &str = "https://app.example.com";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Default)]
struct Server {
  routes: HashMap<String, (u16, Vec<u8>)>,
  calls: HashMap<String, usize>,
  idempotency_keys: Vec<String>,
  // Keyed mutations applied once per key; unkeyed ones every time
  applied_keys: HashSet<String>,
  unkeyed_effects: usize,
  posts: usize,
}

/// Scripted network. Unscripted URLs answer 404.
#[derive(Default)]
pub struct MockNetwork {
  server: Mutex<Server>,
  offline: AtomicBool,
  hang: AtomicBool,
  delay: Mutex<Option<std::time::Duration>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &Url, status: u16, body: impl Into<Vec<u8>>) {
    self
      .server
      .lock()
      .unwrap()
      .routes
      .insert(url.to_string(), (status, body.into()));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Never answer.
  pub fn hang(&self, hang: bool) {
    self.hang.store(hang, Ordering::SeqCst);
  }

  /// Answer every request only after `delay`.
  pub fn delay(&self, delay: std::time::Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Requests seen for `url`, answered or not.
  pub fn calls(&self, url: &Url) -> usize {
    self.server.lock().unwrap().calls.get(url.as_str()).copied().unwrap_or(0)
  }

  pub fn posts(&self) -> usize {
    self.server.lock().unwrap().posts
  }

  /// Idempotency keys of every mutation that reached the server, in order.
  pub fn idempotency_keys(&self) -> Vec<String> {
    self.server.lock().unwrap().idempotency_keys.clone()
  }

  /// Distinct mutations the server applied.
  pub fn server_effects(&self) -> usize {
    let server = self.server.lock().unwrap();
    server.applied_keys.len() + server.unkeyed_effects
  }
}

#[async_trait]
impl Fetcher for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    *self
      .server
      .lock()
      .unwrap()
      .calls
      .entry(request.url.to_string())
      .or_default() += 1;

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.hang.load(Ordering::SeqCst) {
      std::future::pending::<()>().await;
    }
    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::Offline);
    }

    let mut server = self.server.lock().unwrap();
    let (status, body) = server
      .routes
      .get(request.url.as_str())
      .cloned()
      .unwrap_or((404, b"not found".to_vec()));

    if request.method == Method::Post {
      server.posts += 1;
      let key = request.header(IDEMPOTENCY_HEADER).map(str::to_string);
      if let Some(key) = &key {
        server.idempotency_keys.push(key.clone());
      }
      if (200..300).contains(&status) {
        match key {
          Some(key) => {
            server.applied_keys.insert(key);
          }
          None => server.unkeyed_effects += 1,
        }
      }
    }

    Ok(Response::new(status, body))
  }
}

/// Storage whose writes always fail.
#[derive(Default)]
pub struct FailingWrites(MemoryStorage);

impl CacheStorage for FailingWrites {
  fn create_partition(&self, name: &str) -> Result<()> {
    self.0.create_partition(name)
  }

  fn partitions(&self) -> Result<Vec<String>> {
    self.0.partitions()
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    self.0.delete_partition(name)
  }

  fn get(&self, partition: &str, request_key: &str) -> Result<Option<CacheEntry>> {
    self.0.get(partition, request_key)
  }

  fn put(&self, _partition: &str, _entry: &CacheEntry) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn put_all(&self, _partition: &str, _entries: &[CacheEntry]) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    self.0.keys(partition)
  }
}

pub struct Fixture {
  pub network: Arc<MockNetwork>,
  pub cache: CacheStore,
  pub strategies: Strategies,
  pub keep_alive: KeepAlive,
}

pub fn fixture() -> Fixture {
  fixture_with(CacheStore::in_memory())
}

pub fn fixture_with(cache: CacheStore) -> Fixture {
  let network = Arc::new(MockNetwork::new());
  let keep_alive = KeepAlive::new();
  let generation = CacheGeneration::new("homesync", "v1");
  let partitions = Partitions::open(&cache, &generation).unwrap();
  let strategies = Strategies::new(
    cache.clone(),
    network.clone(),
    partitions,
    keep_alive.clone(),
    Url::parse(ORIGIN).unwrap(),
    Duration::minutes(5),
    "/offline.html".to_string(),
  );

  Fixture {
    network,
    cache,
    strategies,
    keep_alive,
  }
}
