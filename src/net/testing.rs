//! In-process transport for exercising the cache and sync paths.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{FetchError, HttpRequest, HttpResponse, Transport};

type Outcome = Result<HttpResponse, FetchError>;

/// Replies from a per-URL script; unscripted URLs fail with a connection error.
///
/// When a URL's script runs down to its last entry, that entry repeats.
#[derive(Default)]
pub struct ScriptedTransport {
  scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
  sent: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append an outcome for `url` (matched against `HttpRequest::url` verbatim)
  pub fn script(&self, url: &str, outcome: Outcome) -> &Self {
    self
      .scripts
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .push_back(outcome);
    self
  }

  pub fn ok(&self, url: &str, status: u16, body: &str) -> &Self {
    self.script(url, Ok(HttpResponse::new(status, body.as_bytes())))
  }

  pub fn offline(&self, url: &str) -> &Self {
    self.script(url, Err(FetchError::Connection("offline".to_string())))
  }

  /// Every request sent so far
  pub fn sent(&self) -> Vec<HttpRequest> {
    self.sent.lock().unwrap().clone()
  }

  pub fn sent_to(&self, url: &str) -> usize {
    self.sent.lock().unwrap().iter().filter(|r| r.url == url).count()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
    self.sent.lock().unwrap().push(request.clone());

    let mut scripts = self.scripts.lock().unwrap();
    match scripts.get_mut(&request.url) {
      Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
      Some(queue) => queue
        .front()
        .cloned()
        .unwrap_or_else(|| Err(FetchError::Connection("unscripted".to_string()))),
      None => Err(FetchError::Connection("unscripted".to_string())),
    }
  }
}
