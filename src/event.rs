use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::engine::{Engine, InstallReport};
use crate::error::{EngineError, Result};
use crate::lifecycle::ActivationReport;
use crate::net::{Request, Response};
use crate::notification::{ClickOutcome, Notification};
use crate::sync::{DrainReport, SyncTask};

/// Keeps the host alive until every registered task has settled.
///
/// Handlers and background revalidations are spawned here instead of on the
/// bare runtime; the host calls [`KeepAlive::settle`] before shutting down so
/// no cache write or replay is dropped half-way.
#[derive(Debug, Clone, Default)]
pub struct KeepAlive {
  tracker: TaskTracker,
}

impl KeepAlive {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
  where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
  {
    self.tracker.spawn(task)
  }

  /// Tasks still running.
  pub fn pending(&self) -> usize {
    self.tracker.len()
  }

  /// Wait for everything spawned so far. New tasks may be spawned afterwards.
  pub async fn settle(&self) {
    self.tracker.close();
    self.tracker.wait().await;
    self.tracker.reopen();
  }
}

type Responder<T> = oneshot::Sender<Result<T>>;

/// Host events
#[derive(Debug)]
pub enum Event {
  Install(Responder<InstallReport>),
  Activate(Responder<ActivationReport>),
  Fetch(Request, Responder<Response>),
  Push(Option<Vec<u8>>, Responder<Notification>),
  /// Connectivity restored for a sync tag
  Sync(String, Responder<DrainReport>),
  /// Deferred mutation for a sync tag
  Enqueue(String, Value, Responder<SyncTask>),
  NotificationClick(Notification, Option<String>, Responder<ClickOutcome>),
}

/// Cloneable handle for posting events and awaiting their results.
#[derive(Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
  async fn request<T>(&self, make: impl FnOnce(Responder<T>) -> Event) -> Result<T> {
    let (respond, rx) = oneshot::channel();
    self.tx.send(make(respond)).map_err(|_| EngineError::EventLoopClosed)?;
    rx.await.map_err(|_| EngineError::EventLoopClosed)?
  }

  pub async fn install(&self) -> Result<InstallReport> {
    self.request(Event::Install).await
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    self.request(Event::Activate).await
  }

  pub async fn fetch(&self, request: Request) -> Result<Response> {
    self.request(|r| Event::Fetch(request, r)).await
  }

  pub async fn push(&self, payload: Option<Vec<u8>>) -> Result<Notification> {
    self.request(|r| Event::Push(payload, r)).await
  }

  pub async fn sync(&self, tag: impl Into<String>) -> Result<DrainReport> {
    let tag = tag.into();
    self.request(|r| Event::Sync(tag, r)).await
  }

  pub async fn enqueue(&self, tag: impl Into<String>, payload: Value) -> Result<SyncTask> {
    let tag = tag.into();
    self.request(|r| Event::Enqueue(tag, payload, r)).await
  }

  pub async fn notification_click(
    &self,
    notification: Notification,
    action: Option<String>,
  ) -> Result<ClickOutcome> {
    self.request(|r| Event::NotificationClick(notification, action, r)).await
  }
}

/// Receives host events and runs each handler as its own keep-alive task.
pub struct EventLoop {
  engine: Arc<Engine>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventLoop {
  pub fn new(engine: Arc<Engine>) -> (Self, EventSender) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { engine, rx }, EventSender { tx })
  }

  /// Run until every sender is dropped, then wait for in-flight handlers.
  pub async fn run(mut self) {
    while let Some(event) = self.rx.recv().await {
      self.dispatch(event);
    }
    debug!(pending = self.engine.keep_alive().pending(), "event loop closing; settling");
    self.engine.keep_alive().settle().await;
  }

  fn dispatch(&self, event: Event) {
    let engine = self.engine.clone();
    // A handler runs to completion even if nobody waits for the answer
    self.engine.keep_alive().spawn(async move {
      match event {
        Event::Install(respond) => reply(respond, engine.install().await),
        Event::Activate(respond) => reply(respond, engine.activate().await),
        Event::Fetch(request, respond) => reply(respond, engine.handle_fetch(&request).await),
        Event::Push(payload, respond) => reply(respond, Ok(engine.handle_push(payload.as_deref()).await)),
        Event::Sync(tag, respond) => reply(respond, engine.handle_sync(&tag).await),
        Event::Enqueue(tag, payload, respond) => reply(respond, engine.enqueue(&tag, payload).await),
        Event::NotificationClick(notification, action, respond) => reply(
          respond,
          engine
            .handle_notification_click(&notification, action.as_deref())
            .await,
        ),
      }
    });
  }
}

fn reply<T>(respond: Responder<T>, result: Result<T>) {
  if let Err(result) = respond.send(result) {
    if let Err(e) = result {
      warn!(error = %e, "handler failed after its caller went away");
    }
  }
}
