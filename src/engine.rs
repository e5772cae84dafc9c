//! Event dispatch: one entry point per triggered event.
//!
//! The engine owns the single context (config, stores, network, router,
//! strategies, coordinator, lifecycle) constructed once per process and
//! passed into every component. Each event is handled to completion; errors
//! propagate to the caller of `handle` rather than being caught and logged
//! at individual call sites.

use chrono::Utc;
use color_eyre::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheStore, Served, ServedSource, Strategies};
use crate::config::Config;
use crate::event::{CacheInfo, Command, Event, NamespaceInfo};
use crate::fallback::FallbackPage;
use crate::http::{HttpClient, Network, RequestDescriptor, ResponseSnapshot};
use crate::lifecycle::{CleanupReport, LifecycleManager, LifecycleState};
use crate::queue::SubmissionQueue;
use crate::router::{Route, Router};
use crate::sync::{DrainReport, Notification, Notifier, SyncCoordinator};

/// What handling an event produced.
#[derive(Debug)]
pub enum Outcome {
  Done,
  Served(Served),
  Drained(DrainReport),
  Cleaned(CleanupReport),
}

/// The offline-resilience engine.
pub struct Engine<N: Network> {
  router: Router,
  strategies: Strategies<N>,
  coordinator: SyncCoordinator<N>,
  lifecycle: LifecycleManager<N>,
  queue: Arc<SubmissionQueue>,
  store: Arc<CacheStore>,
  network: Arc<N>,
  notifier: Arc<dyn Notifier>,
  data_namespace: String,
}

impl Engine<HttpClient> {
  /// Build the engine from configuration: opens the stores, creates the
  /// HTTP client, loads the fallback page.
  pub fn new(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let store = Arc::new(CacheStore::open(&data_dir.join("cache.db"))?);
    let queue = Arc::new(SubmissionQueue::open(&data_dir.join("queue.db"))?);
    let network = Arc::new(HttpClient::new(config)?);
    let fallback = FallbackPage::load(config.fallback_page.as_deref())?;

    Ok(Self::with_parts(config, store, queue, network, notifier, fallback))
  }
}

impl<N: Network> Engine<N> {
  /// Assemble the engine from already-built collaborators.
  pub fn with_parts(
    config: &Config,
    store: Arc<CacheStore>,
    queue: Arc<SubmissionQueue>,
    network: Arc<N>,
    notifier: Arc<dyn Notifier>,
    fallback: FallbackPage,
  ) -> Self {
    let core_namespace = config.core_namespace();
    let data_namespace = config.data_namespace();

    let strategies = Strategies::new(
      Arc::clone(&store),
      Arc::clone(&network),
      core_namespace.clone(),
      data_namespace.clone(),
      fallback,
    );
    let coordinator = SyncCoordinator::new(
      Arc::clone(&queue),
      Arc::clone(&network),
      config.sync.submission_path.clone(),
      Arc::clone(&notifier),
    );
    let lifecycle = LifecycleManager::new(
      Arc::clone(&store),
      Arc::clone(&network),
      core_namespace,
      data_namespace.clone(),
      config.cache.core_files.clone(),
      config.cache.retention_days,
    );

    Self {
      router: Router::new(config.sync.submission_path.clone()),
      strategies,
      coordinator,
      lifecycle,
      queue,
      store,
      network,
      notifier,
      data_namespace,
    }
  }

  pub fn lifecycle_state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  /// (pending, completed) submission counts, for the info surfaces.
  pub fn queue_counts(&self) -> Result<(usize, usize)> {
    Ok((self.queue.pending_count()?, self.queue.completed_count()?))
  }

  /// Audit history of delivered submissions.
  pub fn completed_submissions(&self) -> Result<Vec<crate::queue::CompletedSubmission>> {
    self.queue.list_completed()
  }

  /// Handle one triggered event to completion.
  pub async fn handle(&mut self, event: Event) -> Result<Outcome> {
    match event {
      Event::Install { skip_waiting } => {
        self.lifecycle.install(skip_waiting).await?;
        Ok(Outcome::Done)
      }
      Event::Activate => {
        self.lifecycle.activate().await?;
        Ok(Outcome::Done)
      }
      Event::Fetch(request) => self.handle_fetch(request).await.map(Outcome::Served),
      Event::ConnectivityRestored { tag } => {
        let report = self.coordinator.drain(&tag).await?;
        Ok(Outcome::Drained(report))
      }
      Event::PeriodicCleanup { tag } => {
        let report = self.lifecycle.cleanup(&tag)?;
        Ok(Outcome::Cleaned(report))
      }
      Event::Push { payload } => {
        self.notifier.notify(Notification::PushReceived { payload });
        Ok(Outcome::Done)
      }
      Event::NotificationClick { action } => {
        // Window focus belongs to the hosting shell, not the engine.
        info!(action = %action, "notification clicked");
        Ok(Outcome::Done)
      }
      Event::Command(command) => self.handle_command(command).await,
    }
  }

  async fn handle_fetch(&self, request: RequestDescriptor) -> Result<Served> {
    let route = self.router.route(&request);
    debug!(method = request.method.as_str(), url = %request.url, ?route, "dispatching fetch");

    match route {
      Route::Passthrough => {
        // Never intercepted: a transport error propagates raw.
        let response = self.network.send(&request).await?;
        Ok(Served {
          response,
          source: ServedSource::Network,
        })
      }
      Route::NetworkFirst => {
        let served = self.strategies.network_first(&request).await?;
        // Persisting failed submissions is the engine's responsibility,
        // not the strategy's.
        if served.is_fallback() {
          let payload = submission_payload(&request);
          let id = self.queue.enqueue(&payload)?;
          info!(id = %id, "submission could not be delivered, queued for replay");
        }
        Ok(served)
      }
      Route::DocumentFallback => self.strategies.document_with_fallback(&request).await,
      Route::CacheFirst => self.strategies.cache_first(&request).await,
    }
  }

  async fn handle_command(&mut self, command: Command) -> Result<Outcome> {
    match command {
      Command::SkipWaiting => {
        self.lifecycle.activate().await?;
        Ok(Outcome::Done)
      }
      Command::CacheFormData { payload } => {
        let key = generated_form_data_key(&payload)?;
        let body = serde_json::to_vec(&payload)?;
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        self
          .store
          .put(&self.data_namespace, &key, &ResponseSnapshot::new(200, headers, body))?;
        Ok(Outcome::Done)
      }
      Command::GetCacheInfo { reply } => {
        let info = self.cache_info()?;
        let _ = reply.send(info);
        Ok(Outcome::Done)
      }
      Command::ClearCache { reply } => {
        let result = self.store.clear_all();
        if let Err(err) = &result {
          tracing::warn!(error = %err, "clear cache failed");
        }
        let _ = reply.send(result.is_ok());
        Ok(Outcome::Done)
      }
    }
  }

  fn cache_info(&self) -> Result<CacheInfo> {
    let names = self.store.list_namespaces()?;
    let mut caches = Vec::with_capacity(names.len());
    for name in names {
      let keys = self.store.list_keys(&name)?;
      caches.push(NamespaceInfo { name, keys });
    }
    Ok(CacheInfo {
      total_caches: caches.len(),
      caches,
    })
  }
}

/// The queued payload for a failed submission: the request body as JSON,
/// or a JSON string when the body is not valid JSON.
fn submission_payload(request: &RequestDescriptor) -> serde_json::Value {
  match &request.body {
    Some(body) => serde_json::from_slice(body)
      .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned())),
    None => serde_json::Value::Null,
  }
}

/// Generated key for write-through form-data caching.
fn generated_form_data_key(payload: &serde_json::Value) -> Result<String> {
  let bytes = serde_json::to_vec(payload)?;
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  let digest = hex::encode(hasher.finalize());
  Ok(format!(
    "form-data/{}-{}",
    Utc::now().timestamp_millis(),
    &digest[..12]
  ))
}
