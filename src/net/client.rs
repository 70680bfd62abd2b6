use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::config::ServerConfig;

use super::error::FetchError;
use super::types::{ApiEnvelope, HttpRequest, HttpResponse};

/// Something that can put a request on the wire.
///
/// A non-2xx status is still `Ok`: callers decide what counts as success.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// Library API client
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
}

impl ApiClient {
  pub fn new(config: &ServerConfig) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid server url {}: {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  /// Resolve a path (or absolute URL) against the server origin
  pub fn resolve(&self, url: &str) -> Result<Url, FetchError> {
    self
      .base
      .join(url)
      .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", url, e)))
  }
}

#[async_trait]
impl Transport for ApiClient {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
    let url = self.resolve(&request.url)?;
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|_| FetchError::InvalidRequest(format!("method {}", request.method)))?;

    let mut builder = self.http.request(method, url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?.to_vec();

    tracing::debug!(method = %request.method, url = %request.url, status, "request completed");

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}

/// Perform a live API call and decode the JSON envelope.
///
/// Non-2xx statuses are classified into a [`FetchError`].
pub async fn call<T>(transport: &T, request: &HttpRequest) -> Result<ApiEnvelope, FetchError>
where
  T: Transport + ?Sized,
{
  let response = transport.send(request).await?;
  if !response.is_success() {
    return Err(FetchError::from_status(response.status, &response.body));
  }

  if response.body.is_empty() {
    return Ok(ApiEnvelope {
      success: true,
      ..ApiEnvelope::default()
    });
  }

  serde_json::from_slice(&response.body)
    .map_err(|e| FetchError::InvalidRequest(format!("malformed response body: {}", e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(&ServerConfig {
      url: server.uri(),
      timeout_secs: 5,
    })
    .unwrap()
  }

  #[tokio::test]
  async fn sends_method_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/transactions/return"))
      .and(header("content-type", "application/json"))
      .and(body_json(json!({"isbn": "978-0"})))
      .respond_with(ResponseTemplate::new(201).set_body_string("created"))
      .expect(1)
      .mount(&server)
      .await;

    let request =
      HttpRequest::new("POST", "/api/transactions/return").with_json(&json!({"isbn": "978-0"}));
    let response = client_for(&server).send(&request).await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.text(), "created");
  }

  #[tokio::test]
  async fn error_status_is_a_response_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/missing"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let response = client_for(&server)
      .send(&HttpRequest::get("/api/missing"))
      .await
      .unwrap();
    assert_eq!(response.status, 404);
    assert!(!response.is_success());
  }

  #[tokio::test]
  async fn call_surfaces_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/transactions/borrow"))
      .respond_with(
        ResponseTemplate::new(400)
          .set_body_json(json!({"success": false, "message": "Book is not available"})),
      )
      .mount(&server)
      .await;

    let err = call(
      &client_for(&server),
      &HttpRequest::new("POST", "/api/transactions/borrow"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.user_message(), "Book is not available");
  }

  #[tokio::test]
  async fn unreachable_server_is_a_connection_error() {
    // Port 9 (discard) on localhost is closed on test machines
    let client = ApiClient::new(&ServerConfig {
      url: "http://127.0.0.1:9".to_string(),
      timeout_secs: 2,
    })
    .unwrap();

    let err = client.send(&HttpRequest::get("/api/stats")).await.unwrap_err();
    assert!(err.is_offline());
  }

  #[test]
  fn unresolvable_url_is_an_invalid_request() {
    let client = ApiClient::new(&ServerConfig {
      url: "http://library.local:5000".to_string(),
      timeout_secs: 5,
    })
    .unwrap();

    let err = client.resolve("http://[::1").unwrap_err();
    assert!(matches!(err, FetchError::InvalidRequest(_)));
    assert!(!err.is_offline());
  }

  #[test]
  fn absolute_urls_bypass_the_origin() {
    let client = ApiClient::new(&ServerConfig {
      url: "http://library.local:5000".to_string(),
      timeout_secs: 5,
    })
    .unwrap();

    assert_eq!(
      client.resolve("/api/stats").unwrap().as_str(),
      "http://library.local:5000/api/stats"
    );
    assert_eq!(
      client.resolve("http://mirror.local/x").unwrap().as_str(),
      "http://mirror.local/x"
    );
  }
}
