//! Shared test doubles: a scripted network and a recording notifier.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::http::{Network, RequestDescriptor, ResponseSnapshot};
use crate::sync::{Notification, Notifier};

/// One scripted network outcome.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
  Respond { status: u16, body: Vec<u8> },
  TransportError,
}

/// In-memory network keyed by request URL.
///
/// `respond`/`fail` set a sticky outcome for a URL; `script` queues a
/// sequence where the last outcome sticks. Unknown URLs behave as
/// unreachable. Every call is recorded so tests can assert the zero-fetch
/// invariant.
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, VecDeque<FakeOutcome>>>,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn respond(&self, url: &str, status: u16, body: &[u8]) {
    self.set(url, FakeOutcome::Respond {
      status,
      body: body.to_vec(),
    });
  }

  pub fn fail(&self, url: &str) {
    self.set(url, FakeOutcome::TransportError);
  }

  fn set(&self, url: &str, outcome: FakeOutcome) {
    let mut routes = self.routes.lock().unwrap();
    routes.insert(url.to_string(), VecDeque::from(vec![outcome]));
  }

  pub fn script(&self, url: &str, outcomes: Vec<FakeOutcome>) {
    let mut routes = self.routes.lock().unwrap();
    routes.insert(url.to_string(), outcomes.into());
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_for(&self, url: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|u| u == &url).count()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn send(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
    self.calls.lock().unwrap().push(request.url.clone());

    let outcome = {
      let mut routes = self.routes.lock().unwrap();
      match routes.get_mut(&request.url) {
        Some(queue) if queue.len() > 1 => queue.pop_front(),
        Some(queue) => queue.front().cloned(),
        None => None,
      }
    };

    match outcome {
      Some(FakeOutcome::Respond { status, body }) => {
        Ok(ResponseSnapshot::new(status, Default::default(), body))
      }
      Some(FakeOutcome::TransportError) | None => {
        Err(eyre!("simulated transport failure for {}", request.url))
      }
    }
  }
}

/// Notifier that records everything it is asked to show.
pub struct RecordingNotifier {
  notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self {
      notifications: Mutex::new(Vec::new()),
    }
  }

  pub fn all(&self) -> Vec<Notification> {
    self.notifications.lock().unwrap().clone()
  }

  pub fn delivered_count(&self) -> usize {
    self
      .notifications
      .lock()
      .unwrap()
      .iter()
      .filter(|n| matches!(n, Notification::SubmissionDelivered { .. }))
      .count()
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, notification: Notification) {
    self.notifications.lock().unwrap().push(notification);
  }
}
