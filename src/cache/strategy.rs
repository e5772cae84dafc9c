//! Request-handling strategies over the namespace store.
//!
//! Each strategy is a deterministic policy mapping a request to a sequence
//! of attempted sources (network, cache) and a final response:
//!
//! - Network-First: live endpoints where freshness is mandatory
//! - Document-with-Fallback: navigations, always resolve to a renderable page
//! - Cache-First: static assets, zero network calls on a warm cache
//!
//! Within one invocation the cache write happens before the response is
//! returned. Only 2xx responses are ever written to a namespace.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use super::store::CacheStore;
use crate::fallback::FallbackPage;
use crate::http::{Network, RequestDescriptor, ResponseSnapshot};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedSource {
  /// Live from the network.
  Network,
  /// Warm cache hit, network never attempted.
  Cache,
  /// Cached copy served because the network attempt failed.
  OfflineCache,
  /// The designated offline-fallback document.
  FallbackDocument,
  /// Synthesized by the engine (offline 503 or empty 404).
  Synthesized,
}

/// The outcome of one strategy invocation.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: ResponseSnapshot,
  pub source: ServedSource,
}

impl Served {
  fn network(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServedSource::Network,
    }
  }

  fn cache(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServedSource::Cache,
    }
  }

  fn offline_cache(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServedSource::OfflineCache,
    }
  }

  /// True when the response came from a fallback arm rather than the
  /// network or a warm cache hit. For Network-First this is exactly the
  /// transport-failure case the engine enqueues submissions on.
  pub fn is_fallback(&self) -> bool {
    matches!(
      self.source,
      ServedSource::OfflineCache | ServedSource::FallbackDocument | ServedSource::Synthesized
    )
  }
}

/// The three caching disciplines, sharing one store and one network seam.
pub struct Strategies<N: Network> {
  store: Arc<CacheStore>,
  network: Arc<N>,
  core_namespace: String,
  data_namespace: String,
  fallback: FallbackPage,
}

impl<N: Network> Strategies<N> {
  pub fn new(
    store: Arc<CacheStore>,
    network: Arc<N>,
    core_namespace: String,
    data_namespace: String,
    fallback: FallbackPage,
  ) -> Self {
    Self {
      store,
      network,
      core_namespace,
      data_namespace,
      fallback,
    }
  }

  /// Network-First: live response when reachable, cached copy when not,
  /// structured offline 503 otherwise.
  ///
  /// A delivered non-2xx is returned to the caller as-is and never cached;
  /// only a transport failure engages the fallback arm.
  pub async fn network_first(&self, request: &RequestDescriptor) -> Result<Served> {
    let key = request.cache_key();

    match self.network.send(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store.put(&self.data_namespace, &key, &response)?;
        }
        Ok(Served::network(response))
      }
      Err(err) => {
        debug!(key = %key, error = %err, "network-first fetch failed, trying data cache");
        match self.store.get(&self.data_namespace, &key)? {
          Some(cached) => Ok(Served::offline_cache(cached)),
          None => Ok(Served {
            response: ResponseSnapshot::service_unavailable(),
            source: ServedSource::Synthesized,
          }),
        }
      }
    }
  }

  /// Document-with-Fallback: the user always receives a renderable
  /// document, never a raw network error.
  ///
  /// A delivered non-2xx document is treated like a miss: fall through to
  /// the cached copy or the fallback page, and never cache it.
  pub async fn document_with_fallback(&self, request: &RequestDescriptor) -> Result<Served> {
    let key = request.cache_key();

    match self.network.send(request).await {
      Ok(response) if response.is_success() => {
        self.store.put(&self.core_namespace, &key, &response)?;
        Ok(Served::network(response))
      }
      Ok(response) => {
        warn!(key = %key, status = response.status, "document fetch returned non-2xx, falling back");
        self.document_fallback(&key)
      }
      Err(err) => {
        debug!(key = %key, error = %err, "document fetch failed, falling back");
        self.document_fallback(&key)
      }
    }
  }

  fn document_fallback(&self, key: &str) -> Result<Served> {
    match self.store.get(&self.core_namespace, key)? {
      Some(cached) => Ok(Served::offline_cache(cached)),
      None => Ok(Served {
        response: self.fallback.to_response(),
        source: ServedSource::FallbackDocument,
      }),
    }
  }

  /// Cache-First: a warm cache entry is served without touching the
  /// network. Misses are fetched, cached on 2xx, and degraded to a
  /// well-formed empty 404 on transport failure.
  pub async fn cache_first(&self, request: &RequestDescriptor) -> Result<Served> {
    let key = request.cache_key();

    if let Some(cached) = self.store.get(&self.core_namespace, &key)? {
      return Ok(Served::cache(cached));
    }

    match self.network.send(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store.put(&self.core_namespace, &key, &response)?;
        }
        Ok(Served::network(response))
      }
      Err(err) => {
        debug!(key = %key, error = %err, "cache-first fetch failed with cold cache");
        Ok(Served {
          response: ResponseSnapshot::not_found(),
          source: ServedSource::Synthesized,
        })
      }
    }
  }
}
