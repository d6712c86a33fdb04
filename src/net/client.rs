use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::error::NetworkError;

use super::types::{Headers, Request, Response};

/// Anything that can put a request on the wire.
///
/// A non-2xx answer is still a response; only failing to get one at all is
/// a [`NetworkError`].
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// `reqwest`-backed network access.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpClient {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| NetworkError::Transport(e.to_string()))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?.to_vec();

    debug!(method = %request.method, url = %request.url, status, "fetched");

    let mut response = Response::new(status, body);
    for (name, value) in headers {
      response = response.with_header(&name, value);
    }
    Ok(response)
  }
}
