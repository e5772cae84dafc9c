//! Engine triggers and the command channel.
//!
//! Every external trigger is an explicit typed payload; the engine never
//! operates on ambient fields. Commands carry their own payload shapes and
//! are dispatched exhaustively, so a new command is a compile-checked
//! addition.

use tokio::sync::oneshot;

use crate::http::RequestDescriptor;

/// Control events the engine handles.
#[derive(Debug)]
pub enum Event {
  /// Populate a fresh core namespace with the core file set.
  Install { skip_waiting: bool },
  /// Cut over to this version and delete superseded namespaces.
  Activate,
  /// An intercepted request.
  Fetch(RequestDescriptor),
  /// Connectivity returned (or a replay was requested): drain the queue.
  ConnectivityRestored { tag: String },
  /// Time-triggered eviction pass over the data namespace.
  PeriodicCleanup { tag: String },
  /// A push message arrived; presentation is the notifier's concern.
  Push { payload: String },
  /// The user clicked a notification; window focus is not engine behavior.
  NotificationClick { action: String },
  /// A message from the command channel.
  Command(Command),
}

/// Commands accepted over the message channel.
#[derive(Debug)]
pub enum Command {
  /// Force immediate activation.
  SkipWaiting,
  /// Write-through cache of an arbitrary payload into the data namespace
  /// under a generated key.
  CacheFormData { payload: serde_json::Value },
  /// Reply with a snapshot of every namespace and its stored keys.
  GetCacheInfo { reply: oneshot::Sender<CacheInfo> },
  /// Delete every namespace; reply with success or failure.
  ClearCache { reply: oneshot::Sender<bool> },
}

/// Snapshot returned by [`Command::GetCacheInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
  pub total_caches: usize,
  pub caches: Vec<NamespaceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
  pub name: String,
  pub keys: Vec<String>,
}
