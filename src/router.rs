//! Request routing.
//!
//! Every intercepted request is classified once into a [`ResourceClass`] and
//! matched against a priority-ordered rule list. The first matching rule
//! names the strategy; no rule means `NetworkFirst`. Requests the engine
//! must not touch come back as [`Route::Bypass`].

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::PartitionKind;
use crate::net::{Destination, Method, Request};
use crate::strategy::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
  Document,
  Image,
  Script,
  Style,
  Font,
  /// Same-origin `/api/` calls
  Api,
  /// Third-party APIs listed in config
  ExternalApi,
  Other,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico"];
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs"];
const STYLE_EXTENSIONS: &[&str] = &["css"];
const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf"];

/// Why a request skips the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassReason {
  Method(Method),
  Scheme(String),
  DeniedHost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
  /// Pass straight to the network
  Bypass(BypassReason),
  Handle {
    class: ResourceClass,
    strategy: StrategyKind,
    partition: PartitionKind,
  },
}

/// Predicate half of a routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "kebab-case")]
pub enum Matcher {
  Class { class: ResourceClass },
  PathPrefix { prefix: String },
  Host { host: String },
  Extension { extensions: Vec<String> },
}

impl Matcher {
  fn matches(&self, request: &Request, class: ResourceClass) -> bool {
    match self {
      Matcher::Class { class: wanted } => *wanted == class,
      Matcher::PathPrefix { prefix } => request.url.path().starts_with(prefix.as_str()),
      Matcher::Host { host } => request.url.host_str().is_some_and(|h| host_matches(h, host)),
      Matcher::Extension { extensions } => {
        extension(&request.url).is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
  pub when: Matcher,
  pub strategy: StrategyKind,
  #[serde(default = "default_partition")]
  pub partition: PartitionKind,
}

fn default_partition() -> PartitionKind {
  PartitionKind::Dynamic
}

impl RouteRule {
  fn class(class: ResourceClass, strategy: StrategyKind, partition: PartitionKind) -> Self {
    Self {
      when: Matcher::Class { class },
      strategy,
      partition,
    }
  }
}

/// Rules used when the config does not provide its own.
pub fn default_rules() -> Vec<RouteRule> {
  use ResourceClass::*;
  use StrategyKind::*;

  vec![
    RouteRule::class(Image, CacheFirst, PartitionKind::Images),
    RouteRule::class(Font, CacheFirst, PartitionKind::Dynamic),
    RouteRule::class(ExternalApi, NetworkFirstWithTtl, PartitionKind::Api),
    RouteRule::class(Api, NetworkFirst, PartitionKind::Dynamic),
    RouteRule::class(Script, StaleWhileRevalidate, PartitionKind::Dynamic),
    RouteRule::class(Style, StaleWhileRevalidate, PartitionKind::Dynamic),
    RouteRule::class(Document, NetworkFirst, PartitionKind::Dynamic),
  ]
}

/// `host` equals `domain` or is one of its subdomains.
fn host_matches(host: &str, domain: &str) -> bool {
  let host = host.to_ascii_lowercase();
  let domain = domain.to_ascii_lowercase();
  host == domain || host.ends_with(&format!(".{}", domain))
}

fn extension(url: &Url) -> Option<String> {
  let last = url.path_segments()?.next_back()?;
  let (_, ext) = last.rsplit_once('.')?;
  Some(ext.to_ascii_lowercase())
}

pub struct Router {
  origin: Url,
  rules: Vec<RouteRule>,
  deny_hosts: Vec<String>,
  external_api_hosts: Vec<String>,
}

impl Router {
  pub fn new(
    origin: Url,
    rules: Vec<RouteRule>,
    deny_hosts: Vec<String>,
    external_api_hosts: Vec<String>,
  ) -> Self {
    Self {
      origin,
      rules,
      deny_hosts,
      external_api_hosts,
    }
  }

  pub fn classify(&self, request: &Request) -> ResourceClass {
    let ext = extension(&request.url);
    let has_ext = |list: &[&str]| ext.as_deref().is_some_and(|e| list.contains(&e));

    match request.destination {
      Destination::Document => return ResourceClass::Document,
      Destination::Image => return ResourceClass::Image,
      Destination::Script => return ResourceClass::Script,
      Destination::Style => return ResourceClass::Style,
      Destination::Font => return ResourceClass::Font,
      Destination::Manifest | Destination::Empty => {}
    }

    if has_ext(IMAGE_EXTENSIONS) {
      ResourceClass::Image
    } else if has_ext(SCRIPT_EXTENSIONS) {
      ResourceClass::Script
    } else if has_ext(STYLE_EXTENSIONS) {
      ResourceClass::Style
    } else if has_ext(FONT_EXTENSIONS) {
      ResourceClass::Font
    } else if request
      .url
      .host_str()
      .is_some_and(|h| self.external_api_hosts.iter().any(|d| host_matches(h, d)))
    {
      ResourceClass::ExternalApi
    } else if request.is_same_origin(&self.origin) && request.url.path().starts_with("/api/") {
      ResourceClass::Api
    } else if request.header("accept").is_some_and(|a| a.contains("text/html")) {
      ResourceClass::Document
    } else {
      ResourceClass::Other
    }
  }

  pub fn route(&self, request: &Request) -> Route {
    if request.method != Method::Get {
      return Route::Bypass(BypassReason::Method(request.method));
    }

    let scheme = request.url.scheme();
    if scheme != "http" && scheme != "https" {
      return Route::Bypass(BypassReason::Scheme(scheme.to_string()));
    }

    if let Some(host) = request.url.host_str() {
      if self.deny_hosts.iter().any(|d| host_matches(host, d)) {
        return Route::Bypass(BypassReason::DeniedHost(host.to_string()));
      }
    }

    let class = self.classify(request);
    let (strategy, partition) = self
      .rules
      .iter()
      .find(|rule| rule.when.matches(request, class))
      .map(|rule| (rule.strategy, rule.partition))
      .unwrap_or((StrategyKind::NetworkFirst, PartitionKind::Dynamic));

    Route::Handle {
      class,
      strategy,
      partition,
    }
  }
}
