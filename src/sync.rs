//! Queue draining against the submission endpoint.
//!
//! The coordinator replays pending submissions when connectivity returns.
//! Retry policy, by explicit decision: no in-place retry count or backoff
//! within a run. An entry that fails stays pending verbatim and is
//! attempted again on the next trigger. Failures are isolated per entry, so
//! one bad submission never blocks its siblings.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::http::{Network, RequestDescriptor};
use crate::queue::SubmissionQueue;

/// User-visible outcomes emitted by the engine.
///
/// Presentation (notification payloads, icons, window focus) belongs to an
/// external collaborator behind this seam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
  /// A queued submission reached the server.
  SubmissionDelivered { id: String },
  /// A push message arrived for the user.
  PushReceived { payload: String },
}

pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Notifier that reports outcomes through the log stream.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, notification: Notification) {
    match notification {
      Notification::SubmissionDelivered { id } => {
        info!(id = %id, "submission delivered");
      }
      Notification::PushReceived { payload } => {
        info!(payload = %payload, "push received");
      }
    }
  }
}

/// Outcome of one drain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub delivered: usize,
  pub remaining: usize,
}

/// Drains the durable queue against the network when triggered.
pub struct SyncCoordinator<N: Network> {
  queue: Arc<SubmissionQueue>,
  network: Arc<N>,
  submission_path: String,
  notifier: Arc<dyn Notifier>,
}

impl<N: Network> SyncCoordinator<N> {
  pub fn new(
    queue: Arc<SubmissionQueue>,
    network: Arc<N>,
    submission_path: String,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      queue,
      network,
      submission_path,
      notifier,
    }
  }

  /// Attempt delivery for every currently pending submission, in creation
  /// order. Each entry is attempted independently; a 2xx acknowledgment
  /// moves it to the completed table and emits a success notification.
  pub async fn drain(&self, tag: &str) -> Result<DrainReport> {
    let pending = self.queue.list_pending()?;
    let attempted = pending.len();
    info!(tag = %tag, pending = attempted, "draining submission queue");

    let mut delivered = 0;
    for submission in pending {
      debug!(id = %submission.id, created_at = %submission.created_at, "attempting delivery");
      let body = serde_json::to_vec(&submission.payload)?;
      let request = RequestDescriptor::post(self.submission_path.clone(), body)
        .with_header("content-type", "application/json");

      match self.network.send(&request).await {
        Ok(response) if response.is_success() => {
          self.queue.mark_synced(&submission.id)?;
          self.notifier.notify(Notification::SubmissionDelivered {
            id: submission.id.clone(),
          });
          delivered += 1;
        }
        Ok(response) => {
          warn!(id = %submission.id, status = response.status, "submission rejected, will retry on next trigger");
        }
        Err(err) => {
          warn!(id = %submission.id, error = %err, "submission delivery failed, will retry on next trigger");
        }
      }
    }

    Ok(DrainReport {
      attempted,
      delivered,
      remaining: self.queue.pending_count()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::{FakeNetwork, FakeOutcome, RecordingNotifier};

  const ENDPOINT: &str = "/api/submit";

  fn coordinator(
    network: Arc<FakeNetwork>,
    notifier: Arc<RecordingNotifier>,
  ) -> (SyncCoordinator<FakeNetwork>, Arc<SubmissionQueue>) {
    let queue = Arc::new(SubmissionQueue::open_in_memory().unwrap());
    let coordinator = SyncCoordinator::new(
      Arc::clone(&queue),
      network,
      ENDPOINT.to_string(),
      notifier,
    );
    (coordinator, queue)
  }

  #[tokio::test]
  async fn test_drain_delivers_all_pending() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(ENDPOINT, 200, b"ok");
    let notifier = Arc::new(RecordingNotifier::new());
    let (coordinator, queue) = coordinator(Arc::clone(&network), Arc::clone(&notifier));

    queue.enqueue(&serde_json::json!({ "form_type": "contact", "n": 1 })).unwrap();
    queue.enqueue(&serde_json::json!({ "form_type": "contact", "n": 2 })).unwrap();

    let report = coordinator.drain("connectivity-restored").await.unwrap();

    assert_eq!(report, DrainReport { attempted: 2, delivered: 2, remaining: 0 });
    assert_eq!(queue.pending_count().unwrap(), 0);
    assert_eq!(queue.completed_count().unwrap(), 2);
    assert_eq!(notifier.delivered_count(), 2);
  }

  #[tokio::test]
  async fn test_failed_entry_does_not_block_siblings() {
    let network = Arc::new(FakeNetwork::new());
    // First POST fails at the transport level, the second succeeds.
    network.script(
      ENDPOINT,
      vec![
        FakeOutcome::TransportError,
        FakeOutcome::Respond {
          status: 200,
          body: b"ok".to_vec(),
        },
      ],
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let (coordinator, queue) = coordinator(Arc::clone(&network), notifier);

    let first = queue.enqueue(&serde_json::json!({ "n": 1 })).unwrap();
    queue.enqueue(&serde_json::json!({ "n": 2 })).unwrap();

    let report = coordinator.drain("sync").await.unwrap();

    assert_eq!(report, DrainReport { attempted: 2, delivered: 1, remaining: 1 });
    // The failed entry is still pending, untouched, first in line.
    let pending = queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first);
    assert_eq!(pending[0].payload, serde_json::json!({ "n": 1 }));
  }

  #[tokio::test]
  async fn test_failed_entry_is_retried_verbatim_on_next_trigger() {
    let network = Arc::new(FakeNetwork::new());
    network.fail(ENDPOINT);
    let notifier = Arc::new(RecordingNotifier::new());
    let (coordinator, queue) = coordinator(Arc::clone(&network), Arc::clone(&notifier));

    queue.enqueue(&serde_json::json!({ "form_type": "contact", "n": 1 })).unwrap();

    let offline = coordinator.drain("first").await.unwrap();
    assert_eq!(offline.delivered, 0);
    assert_eq!(offline.remaining, 1);

    network.respond(ENDPOINT, 200, b"ok");
    let online = coordinator.drain("second").await.unwrap();

    assert_eq!(online, DrainReport { attempted: 1, delivered: 1, remaining: 0 });
    assert_eq!(notifier.delivered_count(), 1);
  }

  #[tokio::test]
  async fn test_rejected_submission_stays_pending() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(ENDPOINT, 400, b"bad payload");
    let notifier = Arc::new(RecordingNotifier::new());
    let (coordinator, queue) = coordinator(network, Arc::clone(&notifier));

    queue.enqueue(&serde_json::json!({ "n": 1 })).unwrap();

    let report = coordinator.drain("sync").await.unwrap();

    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 1);
    assert_eq!(notifier.delivered_count(), 0);
  }

  #[tokio::test]
  async fn test_drain_with_empty_queue_is_a_no_op() {
    let network = Arc::new(FakeNetwork::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let (coordinator, _queue) = coordinator(Arc::clone(&network), notifier);

    let report = coordinator.drain("sync").await.unwrap();

    assert_eq!(report, DrainReport { attempted: 0, delivered: 0, remaining: 0 });
    assert_eq!(network.calls(), 0);
  }
}
