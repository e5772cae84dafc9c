//! The offline-fallback document.
//!
//! The page contents belong to an external collaborator: deployments point
//! the config at their own static file. A minimal placeholder is built in
//! so a bare instance still honors the "always a renderable document"
//! guarantee.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::http::ResponseSnapshot;

const PLACEHOLDER_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Offline</title></head>\n<body><p>You are offline. This page is not available yet.</p></body>\n</html>\n";

/// Static document served when a navigation cannot be satisfied from the
/// network or the cache.
#[derive(Debug, Clone)]
pub struct FallbackPage {
  body: Vec<u8>,
}

impl FallbackPage {
  /// Load the collaborator's page from disk, or fall back to the built-in
  /// placeholder when no path is configured.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    match path {
      Some(p) => {
        let body = std::fs::read(p)
          .map_err(|e| eyre!("Failed to read fallback page {}: {}", p.display(), e))?;
        Ok(Self { body })
      }
      None => Ok(Self::default()),
    }
  }

  /// A 200 response: the fallback page is a renderable document, not an
  /// error.
  pub fn to_response(&self) -> ResponseSnapshot {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "text/html".to_string());
    ResponseSnapshot::new(200, headers, self.body.clone())
  }
}

impl Default for FallbackPage {
  fn default() -> Self {
    Self {
      body: PLACEHOLDER_PAGE.as_bytes().to_vec(),
    }
  }
}
