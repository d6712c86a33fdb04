use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::CachedResponse;

/// Header map with lowercased names.
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(format!("unsupported method: {}", other)),
    }
  }
}

/// What the requesting context intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Top-level navigation
  Document,
  Image,
  Script,
  Style,
  Font,
  Manifest,
  /// fetch()/XHR from page code
  #[default]
  Empty,
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "document" => Ok(Destination::Document),
      "image" => Ok(Destination::Image),
      "script" => Ok(Destination::Script),
      "style" => Ok(Destination::Style),
      "font" => Ok(Destination::Font),
      "manifest" => Ok(Destination::Manifest),
      "empty" | "" => Ok(Destination::Empty),
      other => Err(format!("unknown destination: {}", other)),
    }
  }
}

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Empty,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  /// A top-level document navigation.
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_destination(Destination::Document)
  }

  /// A JSON POST, used when replaying queued mutations.
  pub fn post_json(url: Url, payload: &serde_json::Value) -> Self {
    let mut request = Self::new(Method::Post, url).with_header("content-type", "application/json");
    request.body = Some(payload.to_string().into_bytes());
    request
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }

  /// Key under which the response to this request is cached.
  ///
  /// Fragments never reach the server, so they are not part of the key.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }

  pub fn is_same_origin(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Served from cache without contacting the network
  Cache,
  /// Network failed, serving a cached fallback
  Offline,
  /// Network failed and nothing was cached; last-resort offline page
  Placeholder,
}

/// A response body is consumed once. `Response` is deliberately not `Clone`:
/// storing it goes through [`Response::snapshot`], which the cache store calls
/// on a borrowed response, so the caller always keeps the original.
#[derive(Debug)]
pub struct Response {
  status: u16,
  headers: Headers,
  body: Vec<u8>,
  source: ResponseSource,
}

const OFFLINE_PLACEHOLDER: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Offline</title></head>\n<body>\n<h1>You are offline</h1>\n<p>This page is not available offline. Check your connection and try again.</p>\n</body>\n</html>\n";

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
      source: ResponseSource::Network,
    }
  }

  /// Built-in page for navigations when neither network nor cache can help.
  pub fn offline_placeholder() -> Self {
    Self::new(503, OFFLINE_PLACEHOLDER)
      .with_header("content-type", "text/html; charset=utf-8")
      .with_source(ResponseSource::Placeholder)
  }

  pub(crate) fn from_parts(status: u16, headers: Headers, body: Vec<u8>, source: ResponseSource) -> Self {
    Self {
      status,
      headers,
      body,
      source,
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_source(mut self, source: ResponseSource) -> Self {
    self.source = source;
    self
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  /// 2xx
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn headers(&self) -> &Headers {
    &self.headers
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn source(&self) -> ResponseSource {
    self.source
  }

  pub fn body(&self) -> &[u8] {
    &self.body
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn into_body(self) -> Vec<u8> {
    self.body
  }

  /// Copy of the response suitable for storage.
  pub(crate) fn snapshot(&self) -> CachedResponse {
    CachedResponse {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_cache_key_drops_fragment() {
    let request = Request::get(url("https://app.example.com/listing/42?beds=2#photos"));
    assert_eq!(request.cache_key(), "https://app.example.com/listing/42?beds=2");
  }

  #[test]
  fn test_header_names_are_case_insensitive() {
    let request = Request::get(url("https://app.example.com/")).with_header("Accept", "text/html");
    assert_eq!(request.header("accept"), Some("text/html"));
    assert_eq!(request.header("ACCEPT"), Some("text/html"));
  }

  #[test]
  fn test_method_parse() {
    assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
    assert!("BREW".parse::<Method>().is_err());
  }

  #[test]
  fn test_snapshot_leaves_original_usable() {
    let response = Response::new(200, "hello").with_header("content-type", "text/plain");
    let copy = response.snapshot();
    assert_eq!(copy.body, b"hello");
    assert_eq!(response.text(), "hello");
  }

  #[test]
  fn test_offline_placeholder() {
    let response = Response::offline_placeholder();
    assert_eq!(response.status(), 503);
    assert_eq!(response.source(), ResponseSource::Placeholder);
    assert!(response.text().contains("offline"));
  }
}
