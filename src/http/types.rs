//! Request and response shapes shared by the router, strategies and stores.
//!
//! A [`RequestDescriptor`] is the validated form of an intercepted request;
//! a [`ResponseSnapshot`] is a fully materialized response (status, headers,
//! body bytes, capture time) suitable for persisting in a cache namespace.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Retrieval methods are the only ones the engine will ever cache.
  pub fn is_retrieval(&self) -> bool {
    matches!(self, Method::Get | Method::Head)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl std::str::FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(color_eyre::eyre::eyre!("Unsupported method: {}", other)),
    }
  }
}

/// An intercepted request, reduced to the fields the engine routes on.
///
/// The `url` is kept as the application addressed it (typically an
/// origin-relative path); header names are stored lowercased.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
  pub method: Method,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      headers: BTreeMap::new(),
      body: None,
    }
  }

  pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
    Self {
      method: Method::Post,
      url: url.into(),
      headers: BTreeMap::new(),
      body: Some(body),
    }
  }

  /// Attach a header, lowercasing the name.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  /// Canonical cache identity: the URL with its fragment stripped.
  ///
  /// The query string is part of the identity; the fragment never reaches
  /// the server and is dropped. Relative URLs are canonicalized textually.
  pub fn cache_key(&self) -> String {
    match Url::parse(&self.url) {
      Ok(mut parsed) => {
        parsed.set_fragment(None);
        parsed.to_string()
      }
      // Origin-relative path; strip the fragment by hand.
      Err(_) => self.url.split('#').next().unwrap_or("").to_string(),
    }
  }

  /// Path component, used to match the submission endpoint.
  pub fn path(&self) -> String {
    match Url::parse(&self.url) {
      Ok(parsed) => parsed.path().to_string(),
      Err(_) => {
        let without_fragment = self.url.split('#').next().unwrap_or("");
        without_fragment.split('?').next().unwrap_or("").to_string()
      }
    }
  }

  /// Whether the client expects a navigable document.
  pub fn accepts_document(&self) -> bool {
    self
      .header("accept")
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }

  /// Whether the request carries a form-data content-type marker.
  pub fn has_form_marker(&self) -> bool {
    self
      .header("content-type")
      .map(|ct| ct.contains("multipart/form-data") || ct.contains("application/x-www-form-urlencoded"))
      .unwrap_or(false)
  }
}

/// A fully materialized response.
///
/// Bodies are always complete byte vectors; the engine never stores a
/// partial or streaming body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  /// When this response was received from the network.
  pub captured_at: DateTime<Utc>,
}

impl ResponseSnapshot {
  pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      captured_at: Utc::now(),
    }
  }

  /// 2xx means the response is cacheable and, for submissions, acknowledged.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Structured offline failure for submissions with no cached copy.
  ///
  /// Carries a machine-readable body so the caller can render a retry
  /// prompt instead of a raw network error.
  pub fn service_unavailable() -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    Self::new(
      503,
      headers,
      br#"{"error":"offline","message":"The request could not be delivered and no cached copy exists."}"#.to_vec(),
    )
  }

  /// Empty well-formed miss for asset requests that cannot be satisfied.
  pub fn not_found() -> Self {
    Self::new(404, BTreeMap::new(), Vec::new())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.headers.get("content-type").map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_strips_fragment() {
    let request = RequestDescriptor::get("https://example.com/page?tab=1#section");
    assert_eq!(request.cache_key(), "https://example.com/page?tab=1");
  }

  #[test]
  fn test_cache_key_relative_url() {
    let request = RequestDescriptor::get("/styles.css#top");
    assert_eq!(request.cache_key(), "/styles.css");
  }

  #[test]
  fn test_path_ignores_query() {
    let request = RequestDescriptor::get("/api/submit?retry=1");
    assert_eq!(request.path(), "/api/submit");

    let absolute = RequestDescriptor::get("https://example.com/api/submit?retry=1");
    assert_eq!(absolute.path(), "/api/submit");
  }

  #[test]
  fn test_accepts_document() {
    let navigation =
      RequestDescriptor::get("/").with_header("Accept", "text/html,application/xhtml+xml");
    assert!(navigation.accepts_document());

    let asset = RequestDescriptor::get("/app.js").with_header("Accept", "*/*");
    assert!(!asset.accepts_document());
  }

  #[test]
  fn test_form_marker() {
    let form = RequestDescriptor::post("/anything", Vec::new())
      .with_header("Content-Type", "application/x-www-form-urlencoded");
    assert!(form.has_form_marker());

    let json = RequestDescriptor::post("/anything", Vec::new())
      .with_header("Content-Type", "application/json");
    assert!(!json.has_form_marker());
  }

  #[test]
  fn test_retrieval_methods() {
    assert!(Method::Get.is_retrieval());
    assert!(Method::Head.is_retrieval());
    assert!(!Method::Post.is_retrieval());
    assert!(!Method::Delete.is_retrieval());
  }

  #[test]
  fn test_synthesized_responses() {
    let offline = ResponseSnapshot::service_unavailable();
    assert_eq!(offline.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&offline.body).unwrap();
    assert_eq!(body["error"], "offline");

    let missing = ResponseSnapshot::not_found();
    assert_eq!(missing.status, 404);
    assert!(missing.body.is_empty());
  }
}
