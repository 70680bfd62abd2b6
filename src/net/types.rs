use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use url::Url;

/// Base for resolving origin-relative request URLs when only the path matters
const PLACEHOLDER_ORIGIN: &str = "http://localhost/";

/// What the caller intends to do with the response.
///
/// Only used to pick the offline fallback when neither cache nor network can
/// answer a static request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  Document,
  Image,
  #[default]
  Other,
}

/// A fully described outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
  pub method: String,
  /// Absolute URL or a path resolved against the server origin
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  pub destination: Destination,
}

impl HttpRequest {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
      headers: BTreeMap::new(),
      body: None,
      destination: Destination::Other,
    }
  }

  pub fn get(url: &str) -> Self {
    Self::new("GET", url)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_string(), value.to_string());
    self
  }

  /// Attach a JSON body, setting Content-Type unless one is already present.
  pub fn with_json(mut self, body: &Value) -> Self {
    let has_content_type = self
      .headers
      .keys()
      .any(|k| k.eq_ignore_ascii_case("content-type"));
    if !has_content_type {
      self
        .headers
        .insert("Content-Type".to_string(), "application/json".to_string());
    }
    self.body = Some(body.to_string());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Path component of the request URL, with or without an origin.
  ///
  /// Relative URLs are resolved against a placeholder origin. Empty when the
  /// URL doesn't parse at all.
  pub fn path(&self) -> String {
    let parsed = match Url::parse(&self.url) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => {
        Url::parse(PLACEHOLDER_ORIGIN).and_then(|base| base.join(&self.url))
      }
      Err(e) => Err(e),
    };

    match parsed {
      Ok(url) => url.path().to_string(),
      Err(e) => {
        tracing::debug!(url = %self.url, error = %e, "request url has no usable path");
        String::new()
      }
    }
  }
}

/// A received response, whatever its status
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// The `{success, message, ...}` envelope every library API endpoint returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(flatten)]
  pub rest: Map<String, Value>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn path_strips_origin_and_query() {
    let req = HttpRequest::get("http://library.local:5000/api/books/search?q=dune");
    assert_eq!(req.path(), "/api/books/search");

    let req = HttpRequest::get("/api/stats#top");
    assert_eq!(req.path(), "/api/stats");

    let req = HttpRequest::get("https://library.local");
    assert_eq!(req.path(), "/");
  }

  #[test]
  fn path_ignores_urls_inside_the_query() {
    let req = HttpRequest::get("/api/books/search?q=http://example.com/x");
    assert_eq!(req.path(), "/api/books/search");

    let req = HttpRequest::get("http://library.local:5000/api/stats?next=https://a.b/c#d");
    assert_eq!(req.path(), "/api/stats");
  }

  #[test]
  fn json_body_keeps_explicit_content_type() {
    let req = HttpRequest::new("post", "/api/transactions/borrow")
      .with_header("content-type", "application/json; charset=utf-8")
      .with_json(&json!({"isbn": "123"}));

    assert_eq!(req.method, "POST");
    assert_eq!(req.headers.len(), 1);
    assert_eq!(req.body.as_deref(), Some(r#"{"isbn":"123"}"#));
  }

  #[test]
  fn envelope_keeps_extra_fields() {
    let envelope: ApiEnvelope =
      serde_json::from_str(r#"{"success": true, "message": "ok", "due_date": "2026-11-01"}"#)
        .unwrap();

    assert!(envelope.success);
    assert_eq!(envelope.message.as_deref(), Some("ok"));
    assert_eq!(envelope.rest.get("due_date"), Some(&json!("2026-11-01")));
  }
}
