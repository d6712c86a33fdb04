//! Interfaces to the host runtime: open application windows and the
//! notification tray. [`MemoryHost`] keeps both in memory and logs what the
//! engine asks of it.

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::notification::Notification;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
  #[error("client {0} is gone")]
  ClientGone(String),

  #[error("host rejected the request: {0}")]
  Rejected(String),
}

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: String,
  pub url: Url,
  pub focused: bool,
}

#[async_trait]
pub trait Clients: Send + Sync {
  /// Take control of every open client; returns how many were claimed.
  async fn claim(&self) -> usize;

  /// All open windows, controlled or not.
  async fn windows(&self) -> Vec<ClientWindow>;

  async fn focus(&self, id: &str) -> Result<(), HostError>;

  async fn navigate(&self, id: &str, url: &Url) -> Result<(), HostError>;

  async fn open_window(&self, url: &Url) -> Result<ClientWindow, HostError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: &Notification) -> Result<(), HostError>;

  async fn close(&self, tag: &str);
}

#[derive(Debug, Default)]
struct HostState {
  windows: Vec<ClientWindow>,
  next_id: usize,
  claimed: usize,
  shown: Vec<Notification>,
  closed: Vec<String>,
  navigations: Vec<(String, Url)>,
}

/// In-process host.
#[derive(Debug, Default)]
pub struct MemoryHost {
  state: Mutex<HostState>,
}

impl MemoryHost {
  pub fn new() -> Self {
    Self::default()
  }

  fn with<R>(&self, f: impl FnOnce(&mut HostState) -> R) -> R {
    // Every mutation is a single push/assignment, so a poisoned lock still
    // holds consistent state.
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut state)
  }

  /// Register an already-open window, as if the user had opened it.
  pub fn add_window(&self, url: Url) -> String {
    self.with(|s| {
      s.next_id += 1;
      let id = format!("client-{}", s.next_id);
      s.windows.push(ClientWindow {
        id: id.clone(),
        url,
        focused: false,
      });
      id
    })
  }

  pub fn open_windows(&self) -> Vec<ClientWindow> {
    self.with(|s| s.windows.clone())
  }

  pub fn shown(&self) -> Vec<Notification> {
    self.with(|s| s.shown.clone())
  }

  pub fn closed(&self) -> Vec<String> {
    self.with(|s| s.closed.clone())
  }

  pub fn navigations(&self) -> Vec<(String, Url)> {
    self.with(|s| s.navigations.clone())
  }

  pub fn claimed(&self) -> usize {
    self.with(|s| s.claimed)
  }
}

#[async_trait]
impl Clients for MemoryHost {
  async fn claim(&self) -> usize {
    self.with(|s| {
      s.claimed = s.windows.len();
      s.claimed
    })
  }

  async fn windows(&self) -> Vec<ClientWindow> {
    self.open_windows()
  }

  async fn focus(&self, id: &str) -> Result<(), HostError> {
    self.with(|s| {
      if !s.windows.iter().any(|w| w.id == id) {
        return Err(HostError::ClientGone(id.to_string()));
      }
      for window in &mut s.windows {
        window.focused = window.id == id;
      }
      Ok(())
    })?;
    info!(client = id, "focused window");
    Ok(())
  }

  async fn navigate(&self, id: &str, url: &Url) -> Result<(), HostError> {
    self.with(|s| {
      let window = s
        .windows
        .iter_mut()
        .find(|w| w.id == id)
        .ok_or_else(|| HostError::ClientGone(id.to_string()))?;
      window.url = url.clone();
      s.navigations.push((id.to_string(), url.clone()));
      Ok::<_, HostError>(())
    })?;
    info!(client = id, url = %url, "navigated window");
    Ok(())
  }

  async fn open_window(&self, url: &Url) -> Result<ClientWindow, HostError> {
    let id = self.add_window(url.clone());
    self.focus(&id).await?;
    info!(client = %id, url = %url, "opened window");
    Ok(ClientWindow {
      id,
      url: url.clone(),
      focused: true,
    })
  }
}

#[async_trait]
impl Notifier for MemoryHost {
  async fn show(&self, notification: &Notification) -> Result<(), HostError> {
    info!(title = %notification.title, tag = %notification.tag, "showing notification");
    self.with(|s| s.shown.push(notification.clone()));
    Ok(())
  }

  async fn close(&self, tag: &str) {
    info!(tag, "closing notification");
    self.with(|s| s.closed.push(tag.to_string()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_focus_unknown_client() {
    let host = MemoryHost::new();
    let err = host.focus("client-9").await.unwrap_err();
    assert_eq!(err, HostError::ClientGone("client-9".into()));
  }

  #[tokio::test]
  async fn test_open_window_is_focused() {
    let host = MemoryHost::new();
    host.add_window(Url::parse("https://app.example.com/").unwrap());
    let opened = host
      .open_window(&Url::parse("https://app.example.com/search").unwrap())
      .await
      .unwrap();

    let windows = host.open_windows();
    assert_eq!(windows.len(), 2);
    assert!(windows.iter().find(|w| w.id == opened.id).unwrap().focused);
    assert_eq!(windows.iter().filter(|w| w.focused).count(), 1);
  }

  #[tokio::test]
  async fn test_claim_counts_windows() {
    let host = MemoryHost::new();
    host.add_window(Url::parse("https://app.example.com/").unwrap());
    host.add_window(Url::parse("https://app.example.com/a").unwrap());
    assert_eq!(host.claim().await, 2);
    assert_eq!(host.claimed(), 2);
  }
}
