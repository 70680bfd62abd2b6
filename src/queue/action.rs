use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::net::HttpRequest;

/// A mutating request handed to the queue, before it gets an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
  /// Free-text origin label ("borrow", "return", ...)
  #[serde(rename = "type")]
  pub kind: String,
  pub url: String,
  pub method: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub body: Option<Value>,
}

impl NewAction {
  /// A JSON request with the usual Content-Type header.
  pub fn json(kind: &str, method: &str, url: &str, body: Value) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    Self {
      kind: kind.to_string(),
      url: url.to_string(),
      method: method.to_uppercase(),
      headers,
      body: Some(body),
    }
  }

  pub fn to_request(&self) -> HttpRequest {
    build_request(&self.method, &self.url, &self.headers, self.body.as_ref())
  }
}

/// A queued request that has not yet been confirmed by a 2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub url: String,
  pub method: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub body: Option<Value>,
  pub timestamp: DateTime<Utc>,
}

impl PendingAction {
  /// Stamp a new action with a fresh id and the current time.
  pub fn stamp(action: NewAction) -> Self {
    let timestamp = Utc::now();
    Self {
      id: generate_id(timestamp),
      kind: action.kind,
      url: action.url,
      method: action.method,
      headers: action.headers,
      body: action.body,
      timestamp,
    }
  }

  /// Rebuild the stored request.
  pub fn to_request(&self) -> HttpRequest {
    build_request(&self.method, &self.url, &self.headers, self.body.as_ref())
  }
}

/// A string body is sent as-is (the caller already serialized it); any other
/// JSON value is serialized here.
fn build_request(
  method: &str,
  url: &str,
  headers: &BTreeMap<String, String>,
  body: Option<&Value>,
) -> HttpRequest {
  let mut request = HttpRequest::new(method, url);
  request.headers = headers.clone();
  request.body = match body {
    None | Some(Value::Null) => None,
    Some(Value::String(raw)) => Some(raw.clone()),
    Some(other) => Some(other.to_string()),
  };
  request
}

/// `<unix-millis>-<random hex>`
fn generate_id(at: DateTime<Utc>) -> String {
  let suffix: u32 = rand::thread_rng().gen();
  format!("{}-{:08x}", at.timestamp_millis(), suffix)
}
