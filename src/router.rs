//! Request classification.
//!
//! The router maps every intercepted request to exactly one route, with no
//! side effects. The submission check runs before the non-retrieval check
//! so that submission POSTs are captured; every other non-idempotent
//! request passes through untouched.

use crate::http::RequestDescriptor;

/// The strategy a request is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Never intercepted; forwarded to the network unmodified.
  Passthrough,
  /// Submission / API traffic where freshness is mandatory.
  NetworkFirst,
  /// Navigations that must always resolve to a renderable document.
  DocumentFallback,
  /// Static assets; also the safe default for anything unclassifiable.
  CacheFirst,
}

/// Deterministic request classifier.
pub struct Router {
  submission_path: String,
}

impl Router {
  pub fn new(submission_path: impl Into<String>) -> Self {
    Self {
      submission_path: submission_path.into(),
    }
  }

  pub fn route(&self, request: &RequestDescriptor) -> Route {
    if request.path() == self.submission_path || request.has_form_marker() {
      return Route::NetworkFirst;
    }

    if !request.method.is_retrieval() {
      return Route::Passthrough;
    }

    if request.accepts_document() {
      return Route::DocumentFallback;
    }

    Route::CacheFirst
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Method, RequestDescriptor};

  fn router() -> Router {
    Router::new("/api/submit")
  }

  #[test]
  fn test_submission_endpoint_routes_network_first() {
    let request = RequestDescriptor::post("/api/submit", b"{}".to_vec());
    assert_eq!(router().route(&request), Route::NetworkFirst);
  }

  #[test]
  fn test_submission_endpoint_with_query_routes_network_first() {
    let request = RequestDescriptor::post("/api/submit?retry=1", b"{}".to_vec());
    assert_eq!(router().route(&request), Route::NetworkFirst);
  }

  #[test]
  fn test_form_marker_routes_network_first() {
    let request = RequestDescriptor::post("/legacy/handler", Vec::new())
      .with_header("content-type", "multipart/form-data; boundary=x");
    assert_eq!(router().route(&request), Route::NetworkFirst);
  }

  #[test]
  fn test_other_mutations_pass_through() {
    let mut request = RequestDescriptor::post("/api/other", b"{}".to_vec());
    assert_eq!(router().route(&request), Route::Passthrough);

    request.method = Method::Delete;
    assert_eq!(router().route(&request), Route::Passthrough);

    request.method = Method::Put;
    assert_eq!(router().route(&request), Route::Passthrough);
  }

  #[test]
  fn test_navigation_routes_document_fallback() {
    let request = RequestDescriptor::get("/about")
      .with_header("accept", "text/html,application/xhtml+xml;q=0.9");
    assert_eq!(router().route(&request), Route::DocumentFallback);
  }

  #[test]
  fn test_asset_get_routes_cache_first() {
    let request = RequestDescriptor::get("/static/app.js").with_header("accept", "*/*");
    assert_eq!(router().route(&request), Route::CacheFirst);

    let image = RequestDescriptor::get("/logo.png").with_header("accept", "image/png");
    assert_eq!(router().route(&image), Route::CacheFirst);
  }

  #[test]
  fn test_unclassifiable_get_defaults_to_cache_first() {
    // No accept header, nothing recognizable: never discard a cacheable
    // asset request.
    let request = RequestDescriptor::get("weird:[]uri#frag");
    assert_eq!(router().route(&request), Route::CacheFirst);
  }
}
