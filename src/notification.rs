//! Push notification decoding, display and click routing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::error::{EngineError, Result};
use crate::host::{Clients, Notifier};

/// Action ids with a fixed meaning.
pub const ACTION_VIEW: &str = "view";
pub const ACTION_EXPLORE: &str = "explore";
pub const ACTION_SAVE: &str = "save";
pub const ACTION_CLOSE: &str = "close";

/// Targets for explicit action buttons. `view` is resolved like a plain click.
const ACTION_TARGETS: &[(&str, &str)] = &[(ACTION_EXPLORE, "/search"), (ACTION_SAVE, "/saved-properties")];

/// Targets by `data.type`.
const TYPE_TARGETS: &[(&str, &str)] = &[
  ("new-property", "/search"),
  ("price-alert", "/saved-properties"),
  ("application-update", "/applications"),
  ("maintenance-reminder", "/maintenance"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub require_interaction: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Push payload as sent by the server. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub icon: Option<String>,
  pub badge: Option<String>,
  pub tag: Option<String>,
  pub image: Option<String>,
  pub data: Option<NotificationData>,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
}

/// Engine-wide fallbacks for payload fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
}

impl Default for NotificationDefaults {
  fn default() -> Self {
    Self {
      title: "HomeSync".to_string(),
      body: "New update available".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/badge-72x72.png".to_string(),
      tag: "homesync-notification".to_string(),
    }
  }
}

/// What gets displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
  pub require_interaction: bool,
}

/// Result of handling a click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// Closed without navigating
  Dismissed,
  /// An existing window was focused and navigated
  Focused { client_id: String, url: Url },
  Opened { url: Url },
}

fn default_actions() -> Vec<NotificationAction> {
  vec![
    NotificationAction {
      action: ACTION_VIEW.to_string(),
      title: "View".to_string(),
      icon: None,
    },
    NotificationAction {
      action: ACTION_CLOSE.to_string(),
      title: "Close".to_string(),
      icon: None,
    },
  ]
}

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
  table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

pub struct NotificationRouter {
  defaults: NotificationDefaults,
  origin: Url,
  notifier: Arc<dyn Notifier>,
  clients: Arc<dyn Clients>,
}

impl NotificationRouter {
  pub fn new(
    defaults: NotificationDefaults,
    origin: Url,
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn Clients>,
  ) -> Self {
    Self {
      defaults,
      origin,
      notifier,
      clients,
    }
  }

  /// Build the notification for a push. Never fails: a payload that is not
  /// a JSON object becomes the body of a default notification.
  pub fn decode(&self, payload: Option<&[u8]>) -> Notification {
    let payload = match payload {
      None => NotificationPayload::default(),
      Some(bytes) => match serde_json::from_slice::<NotificationPayload>(bytes) {
        Ok(payload) => payload,
        Err(e) => {
          let err = EngineError::MalformedPushPayload(e);
          warn!(error = %err, "falling back to plain-text notification");
          let text = String::from_utf8_lossy(bytes).trim().to_string();
          NotificationPayload {
            body: (!text.is_empty()).then_some(text),
            ..Default::default()
          }
        }
      },
    };

    let data = payload.data.unwrap_or_default();
    let actions = if payload.actions.is_empty() {
      default_actions()
    } else {
      payload.actions
    };

    Notification {
      title: payload.title.unwrap_or_else(|| self.defaults.title.clone()),
      body: payload.body.unwrap_or_else(|| self.defaults.body.clone()),
      icon: payload.icon.unwrap_or_else(|| self.defaults.icon.clone()),
      badge: payload.badge.unwrap_or_else(|| self.defaults.badge.clone()),
      tag: payload.tag.unwrap_or_else(|| self.defaults.tag.clone()),
      image: payload.image,
      require_interaction: data.require_interaction.unwrap_or(false),
      data,
      actions,
    }
  }

  /// Decode and display a push. Display failures are logged only.
  pub async fn on_push(&self, payload: Option<&[u8]>) -> Notification {
    let notification = self.decode(payload);
    if let Err(e) = self.notifier.show(&notification).await {
      warn!(tag = %notification.tag, error = %e, "failed to show notification");
    }
    notification
  }

  /// Path a click should open, or `None` for `close`.
  ///
  /// Resolution order: explicit action id, then the `data.type` table, then
  /// `data.url`, then `/`.
  pub fn resolve_target(&self, action: Option<&str>, data: &NotificationData) -> Option<String> {
    match action {
      Some(ACTION_CLOSE) => return None,
      Some(id) => {
        if let Some(path) = lookup(ACTION_TARGETS, id) {
          return Some(path.to_string());
        }
      }
      None => {}
    }

    if let Some(path) = data.kind.as_deref().and_then(|kind| lookup(TYPE_TARGETS, kind)) {
      return Some(path.to_string());
    }
    Some(data.url.clone().unwrap_or_else(|| "/".to_string()))
  }

  /// Resolve a target against the origin. Anything landing off-origin
  /// opens `/` instead.
  fn target_url(&self, target: &str) -> Url {
    match self.origin.join(target) {
      Ok(url) if url.origin() == self.origin.origin() => url,
      Ok(url) => {
        warn!(url = %url, "notification target is off-origin; opening /");
        self.origin.join("/").unwrap_or_else(|_| self.origin.clone())
      }
      Err(_) => self.origin.join("/").unwrap_or_else(|_| self.origin.clone()),
    }
  }

  /// Close the notification, then bring the app to the resolved target:
  /// reuse an open window on our origin when there is one, open a new one
  /// otherwise.
  pub async fn on_click(&self, notification: &Notification, action: Option<&str>) -> Result<ClickOutcome> {
    self.notifier.close(&notification.tag).await;

    let Some(target) = self.resolve_target(action, &notification.data) else {
      debug!(tag = %notification.tag, "notification dismissed");
      return Ok(ClickOutcome::Dismissed);
    };
    let url = self.target_url(&target);

    let windows = self.clients.windows().await;
    if let Some(window) = windows.iter().find(|w| w.url.origin() == self.origin.origin()) {
      let reused = async {
        self.clients.focus(&window.id).await?;
        self.clients.navigate(&window.id, &url).await
      };
      match reused.await {
        Ok(()) => {
          return Ok(ClickOutcome::Focused {
            client_id: window.id.clone(),
            url,
          })
        }
        Err(e) => debug!(client = %window.id, error = %e, "could not reuse window; opening a new one"),
      }
    }

    match self.clients.open_window(&url).await {
      Ok(_) => Ok(ClickOutcome::Opened { url }),
      Err(e) => {
        warn!(url = %url, error = %e, "failed to open window");
        Ok(ClickOutcome::Dismissed)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::host::MemoryHost;

  fn router(host: &Arc<MemoryHost>) -> NotificationRouter {
    NotificationRouter::new(
      NotificationDefaults::default(),
      Url::parse("https://app.example.com").unwrap(),
      host.clone(),
      host.clone(),
    )
  }

  #[test]
  fn test_decode_full_payload() {
    let host = Arc::new(MemoryHost::new());
    let payload = br#"{
      "title": "Price drop",
      "body": "A saved home is now $1,950",
      "icon": "/icons/price.png",
      "badge": "/icons/b.png",
      "tag": "price-42",
      "image": "/img/42.jpg",
      "data": {"url": "/properties/42", "type": "price-alert", "requireInteraction": true},
      "actions": [{"action": "save", "title": "Save"}]
    }"#;

    let n = router(&host).decode(Some(payload));
    assert_eq!(n.title, "Price drop");
    assert_eq!(n.tag, "price-42");
    assert_eq!(n.image.as_deref(), Some("/img/42.jpg"));
    assert!(n.require_interaction);
    assert_eq!(n.actions.len(), 1);
    assert_eq!(n.actions[0].action, "save");
  }

  #[test]
  fn test_decode_applies_defaults() {
    let host = Arc::new(MemoryHost::new());
    let n = router(&host).decode(Some(br#"{"title":"New match","body":"3 new properties","data":{"type":"new-property"}}"#));

    assert_eq!(n.title, "New match");
    assert_eq!(n.icon, "/icons/icon-192x192.png");
    assert!(!n.require_interaction);
    let ids: Vec<&str> = n.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(ids, vec!["view", "close"]);
  }

  #[test]
  fn test_malformed_payload_degrades_to_text() {
    let host = Arc::new(MemoryHost::new());
    let n = router(&host).decode(Some(b"{not json"));
    assert_eq!(n.title, "HomeSync");
    assert_eq!(n.icon, "/icons/icon-192x192.png");
    assert_eq!(n.body, "{not json");
  }

  #[test]
  fn test_empty_push_uses_defaults() {
    let host = Arc::new(MemoryHost::new());
    let n = router(&host).decode(None);
    assert_eq!(n.body, "New update available");
  }

  #[test]
  fn test_resolve_target_order() {
    let host = Arc::new(MemoryHost::new());
    let r = router(&host);
    let typed = NotificationData {
      kind: Some("maintenance-reminder".into()),
      ..Default::default()
    };

    assert_eq!(r.resolve_target(Some("close"), &typed), None);
    assert_eq!(r.resolve_target(Some("explore"), &typed).as_deref(), Some("/search"));
    assert_eq!(r.resolve_target(Some("save"), &typed).as_deref(), Some("/saved-properties"));
    assert_eq!(r.resolve_target(Some("view"), &typed).as_deref(), Some("/maintenance"));
    assert_eq!(r.resolve_target(None, &typed).as_deref(), Some("/maintenance"));
    assert_eq!(r.resolve_target(None, &NotificationData::default()).as_deref(), Some("/"));

    // The type table wins over a url in the data
    let typed_with_url = NotificationData {
      url: Some("/x".into()),
      kind: Some("new-property".into()),
      ..Default::default()
    };
    assert_eq!(r.resolve_target(None, &typed_with_url).as_deref(), Some("/search"));

    let url_only = NotificationData {
      url: Some("/applications/9".into()),
      kind: Some("unknown-kind".into()),
      ..Default::default()
    };
    assert_eq!(r.resolve_target(None, &url_only).as_deref(), Some("/applications/9"));
  }

  #[tokio::test]
  async fn test_off_origin_target_opens_root() {
    let host = Arc::new(MemoryHost::new());
    let r = router(&host);
    let n = r.decode(Some(br#"{"data":{"url":"https://phish.example.net/login"}}"#));

    let outcome = r.on_click(&n, None).await.unwrap();
    assert_eq!(
      outcome,
      ClickOutcome::Opened {
        url: Url::parse("https://app.example.com/").unwrap()
      }
    );
  }

  #[tokio::test]
  async fn test_push_then_default_click_opens_search() {
    let host = Arc::new(MemoryHost::new());
    let r = router(&host);

    let n = r
      .on_push(Some(br#"{"title":"New match","body":"3 new properties","data":{"type":"new-property"}}"#))
      .await;
    assert_eq!(host.shown()[0].title, "New match");

    let outcome = r.on_click(&n, None).await.unwrap();
    assert_eq!(
      outcome,
      ClickOutcome::Opened {
        url: Url::parse("https://app.example.com/search").unwrap()
      }
    );
    assert_eq!(host.closed(), vec![n.tag.clone()]);
  }

  #[tokio::test]
  async fn test_close_action_never_navigates() {
    let host = Arc::new(MemoryHost::new());
    host.add_window(Url::parse("https://app.example.com/").unwrap());
    let r = router(&host);
    let n = r.decode(Some(br#"{"title":"t","data":{"type":"price-alert"}}"#));

    let outcome = r.on_click(&n, Some("close")).await.unwrap();
    assert_eq!(outcome, ClickOutcome::Dismissed);
    assert_eq!(host.closed().len(), 1);
    assert!(host.navigations().is_empty());
    assert_eq!(host.open_windows().len(), 1);
  }

  #[tokio::test]
  async fn test_click_reuses_existing_window() {
    let host = Arc::new(MemoryHost::new());
    host.add_window(Url::parse("https://elsewhere.example.org/").unwrap());
    let ours = host.add_window(Url::parse("https://app.example.com/home").unwrap());
    let r = router(&host);
    let n = r.decode(Some(br#"{"data":{"type":"price-alert"}}"#));

    for _ in 0..3 {
      let outcome = r.on_click(&n, None).await.unwrap();
      assert!(matches!(outcome, ClickOutcome::Focused { ref client_id, .. } if *client_id == ours));
    }

    // Repeated clicks never spawn extra windows
    assert_eq!(host.open_windows().len(), 2);
    let (_, url) = host.navigations().pop().unwrap();
    assert_eq!(url.path(), "/saved-properties");
  }
}
