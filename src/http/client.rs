//! Network seam and the reqwest-backed implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;

use super::types::{Method, RequestDescriptor, ResponseSnapshot};
use crate::config::Config;

/// The network side of every strategy and of queue draining.
///
/// A transport failure (unreachable host, connection reset, timeout) is an
/// `Err`; a delivered response is `Ok` whatever its status, so strategies
/// can distinguish the two failure classes.
#[async_trait]
pub trait Network: Send + Sync {
  async fn send(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot>;
}

/// HTTP client resolving origin-relative URLs against the configured origin.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  origin: String,
}

impl HttpClient {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: config.origin.trim_end_matches('/').to_string(),
    })
  }

  fn absolute_url(&self, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
      url.to_string()
    } else {
      format!("{}{}", self.origin, url)
    }
  }
}

#[async_trait]
impl Network for HttpClient {
  async fn send(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
    let url = self.absolute_url(&request.url);

    let mut builder = match request.method {
      Method::Get => self.client.get(url.as_str()),
      Method::Head => self.client.head(url.as_str()),
      Method::Post => self.client.post(url.as_str()),
      Method::Put => self.client.put(url.as_str()),
      Method::Patch => self.client.patch(url.as_str()),
      Method::Delete => self.client.delete(url.as_str()),
    };

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_lowercase(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
      .to_vec();

    Ok(ResponseSnapshot::new(status, headers, body))
  }
}
