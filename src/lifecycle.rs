//! Cache-generation lifecycle: install-time population, activate-time
//! cutover, and periodic age-based eviction.
//!
//! The lifecycle manager runs on its own triggers and never participates in
//! per-request flow. It may delete entries from any namespace but never
//! creates content beyond the install-time core file set.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::http::{Network, RequestDescriptor};

/// Where this instance is in its version lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  InstalledWaiting,
  Active,
  Superseded,
}

/// Outcome of one eviction pass over the data namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
  pub scanned: usize,
  pub evicted: usize,
}

/// Owns core-namespace versioning and data-namespace retention.
pub struct LifecycleManager<N: Network> {
  store: Arc<CacheStore>,
  network: Arc<N>,
  core_namespace: String,
  data_namespace: String,
  core_files: Vec<String>,
  retention: Duration,
  state: LifecycleState,
}

impl<N: Network> LifecycleManager<N> {
  pub fn new(
    store: Arc<CacheStore>,
    network: Arc<N>,
    core_namespace: String,
    data_namespace: String,
    core_files: Vec<String>,
    retention_days: i64,
  ) -> Self {
    Self {
      store,
      network,
      core_namespace,
      data_namespace,
      core_files,
      retention: Duration::days(retention_days),
      state: LifecycleState::InstalledWaiting,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// Populate a fresh core namespace with the configured core file set.
  ///
  /// Any fetch or write failure aborts the install and drops the partial
  /// namespace, leaving the previous version current. With `skip_waiting`
  /// the instance activates immediately after populating.
  pub async fn install(&mut self, skip_waiting: bool) -> Result<()> {
    let previous = self.state;
    self.state = LifecycleState::Installing;
    info!(namespace = %self.core_namespace, files = self.core_files.len(), "installing core namespace");

    if let Err(err) = self.populate_core().await {
      // Abort: the partial namespace must not survive.
      self.store.delete_namespace(&self.core_namespace)?;
      self.state = previous;
      return Err(err);
    }

    if skip_waiting {
      self.activate().await
    } else {
      self.state = LifecycleState::InstalledWaiting;
      Ok(())
    }
  }

  async fn populate_core(&self) -> Result<()> {
    self.store.register_namespace(&self.core_namespace)?;

    for file in &self.core_files {
      let request = RequestDescriptor::get(file);
      let response = self
        .network
        .send(&request)
        .await
        .map_err(|e| eyre!("Failed to fetch core file {}: {}", file, e))?;

      if !response.is_success() {
        return Err(eyre!(
          "Core file {} returned status {}",
          file,
          response.status
        ));
      }

      self.store.put(&self.core_namespace, &request.cache_key(), &response)?;
    }

    Ok(())
  }

  /// Cutover: delete every namespace that is neither the current core tag
  /// nor the long-lived data namespace, then serve all clients.
  pub async fn activate(&mut self) -> Result<()> {
    for namespace in self.store.list_namespaces()? {
      if namespace != self.core_namespace && namespace != self.data_namespace {
        info!(namespace = %namespace, "deleting superseded namespace");
        self.store.delete_namespace(&namespace)?;
      }
    }

    self.state = LifecycleState::Active;
    info!(namespace = %self.core_namespace, "activated");
    Ok(())
  }

  /// Scan the data namespace and delete entries older than the retention
  /// window. A failed per-entry delete is logged and skipped; it does not
  /// abort the pass. This is the only path that removes entries outside of
  /// namespace cutover.
  pub fn cleanup(&self, tag: &str) -> Result<CleanupReport> {
    let cutoff = Utc::now() - self.retention;
    let entries = self.store.list_entries(&self.data_namespace)?;
    let scanned = entries.len();

    let mut evicted = 0;
    for (key, captured_at) in entries {
      if captured_at >= cutoff {
        continue;
      }
      match self.store.delete_entry(&self.data_namespace, &key) {
        Ok(()) => evicted += 1,
        Err(err) => {
          warn!(key = %key, error = %err, "failed to evict entry, skipping");
        }
      }
    }

    info!(tag = %tag, scanned, evicted, "cleanup pass finished");
    Ok(CleanupReport { scanned, evicted })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::ResponseSnapshot;
  use crate::testutil::FakeNetwork;
  use std::collections::BTreeMap;

  const CORE: &str = "formsync-core-v2";
  const DATA: &str = "formsync-data";

  fn manager(
    store: Arc<CacheStore>,
    network: Arc<FakeNetwork>,
    files: &[&str],
  ) -> LifecycleManager<FakeNetwork> {
    LifecycleManager::new(
      store,
      network,
      CORE.to_string(),
      DATA.to_string(),
      files.iter().map(|f| f.to_string()).collect(),
      7,
    )
  }

  fn aged_snapshot(age: Duration) -> ResponseSnapshot {
    let mut response = ResponseSnapshot::new(200, BTreeMap::new(), b"data".to_vec());
    response.captured_at = Utc::now() - age;
    response
  }

  #[tokio::test]
  async fn test_install_populates_core_file_set() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    network.respond("/", 200, b"<html>home</html>");
    network.respond("/app.js", 200, b"js");
    let mut manager = manager(Arc::clone(&store), network, &["/", "/app.js"]);

    manager.install(false).await.unwrap();

    assert_eq!(manager.state(), LifecycleState::InstalledWaiting);
    assert_eq!(store.list_keys(CORE).unwrap(), vec!["/", "/app.js"]);
  }

  #[tokio::test]
  async fn test_install_with_skip_waiting_activates() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    network.respond("/", 200, b"home");
    let mut manager = manager(Arc::clone(&store), network, &["/"]);

    manager.install(true).await.unwrap();

    assert_eq!(manager.state(), LifecycleState::Active);
  }

  #[tokio::test]
  async fn test_failed_install_drops_partial_namespace() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    network.respond("/", 200, b"home");
    network.fail("/app.js");
    let mut manager = manager(Arc::clone(&store), network, &["/", "/app.js"]);

    assert!(manager.install(false).await.is_err());

    assert!(!store.list_namespaces().unwrap().contains(&CORE.to_string()));
    assert_eq!(manager.state(), LifecycleState::InstalledWaiting);
  }

  #[tokio::test]
  async fn test_install_aborts_on_non_success_core_file() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    network.respond("/", 404, b"missing");
    let mut manager = manager(Arc::clone(&store), network, &["/"]);

    assert!(manager.install(false).await.is_err());
    assert!(store.list_namespaces().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activate_deletes_stale_namespaces_and_keeps_data() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let snapshot = ResponseSnapshot::new(200, BTreeMap::new(), b"x".to_vec());
    store.put("formsync-core-v1", "/", &snapshot).unwrap();
    store.put(CORE, "/", &snapshot).unwrap();
    store.put(DATA, "/api/submit", &snapshot).unwrap();

    let network = Arc::new(FakeNetwork::new());
    let mut manager = manager(Arc::clone(&store), network, &["/"]);
    manager.activate().await.unwrap();

    let namespaces = store.list_namespaces().unwrap();
    assert_eq!(namespaces, vec![CORE.to_string(), DATA.to_string()]);
    assert_eq!(manager.state(), LifecycleState::Active);
  }

  #[test]
  fn test_cleanup_evicts_only_entries_past_retention() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    // One entry just past the window, one comfortably inside it.
    store
      .put(DATA, "/old", &aged_snapshot(Duration::days(7) + Duration::seconds(1)))
      .unwrap();
    store.put(DATA, "/recent", &aged_snapshot(Duration::days(6))).unwrap();

    let network = Arc::new(FakeNetwork::new());
    let manager = manager(Arc::clone(&store), network, &["/"]);

    let report = manager.cleanup("periodic").unwrap();

    assert_eq!(report, CleanupReport { scanned: 2, evicted: 1 });
    assert!(store.get(DATA, "/old").unwrap().is_none());
    assert!(store.get(DATA, "/recent").unwrap().is_some());
  }

  #[test]
  fn test_cleanup_on_empty_data_namespace() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    let manager = manager(store, network, &["/"]);

    let report = manager.cleanup("periodic").unwrap();
    assert_eq!(report, CleanupReport { scanned: 0, evicted: 0 });
  }

  #[test]
  fn test_cleanup_never_touches_core_namespace() {
    let store = Arc::new(CacheStore::open_in_memory().unwrap());
    store
      .put(CORE, "/ancient", &aged_snapshot(Duration::days(30)))
      .unwrap();

    let network = Arc::new(FakeNetwork::new());
    let manager = manager(Arc::clone(&store), network, &["/"]);
    manager.cleanup("periodic").unwrap();

    assert!(store.get(CORE, "/ancient").unwrap().is_some());
  }
}
