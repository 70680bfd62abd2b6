//! Cache layer that orchestrates the bucket policies with network fetching.

use color_eyre::Result;
use futures::future::join_all;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::net::{Destination, FetchError, HttpRequest, HttpResponse, Transport};

use super::storage::ResponseStorage;
use super::traits::CacheResult;

/// Outcome of pre-populating the static bucket.
#[derive(Debug, Default)]
pub struct InstallReport {
  pub stored: usize,
  /// (url, reason) for every manifest entry that couldn't be cached
  pub failed: Vec<(String, String)>,
}

/// Cache layer that manages the bucket policies and network fetching.
///
/// This layer sits between callers and the transport, the same way a
/// service worker's fetch handler does.
pub struct CacheLayer<S: ResponseStorage> {
  storage: Arc<S>,
  static_cache: String,
  data_cache: String,
  api_prefix: String,
  api_allow: Vec<String>,
  offline_page: String,
  fallback_image: String,
}

impl<S: ResponseStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, config: &CacheConfig) -> Self {
    Self {
      storage: Arc::new(storage),
      static_cache: config.static_cache_name(),
      data_cache: config.data_cache_name(),
      api_prefix: config.api_prefix.clone(),
      api_allow: config.api_cache_allow.clone(),
      offline_page: config.offline_page.clone(),
      fallback_image: config.fallback_image.clone(),
    }
  }

  pub fn static_cache(&self) -> &str {
    &self.static_cache
  }

  pub fn data_cache(&self) -> &str {
    &self.data_cache
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  fn is_api(&self, request: &HttpRequest) -> bool {
    request.path().starts_with(&self.api_prefix)
  }

  /// GETs under the API prefix, restricted to the allow-list when one is set.
  fn is_cacheable_api(&self, request: &HttpRequest) -> bool {
    if !request.is_get() {
      return false;
    }
    let path = request.path();
    self.api_allow.is_empty() || self.api_allow.iter().any(|p| path.starts_with(p.as_str()))
  }

  /// Pre-populate the static bucket from the asset manifest.
  ///
  /// Assets are fetched concurrently; one failure doesn't stop the rest.
  pub async fn install<T>(&self, transport: &T, manifest: &[String]) -> InstallReport
  where
    T: Transport + ?Sized,
  {
    let fetches = manifest.iter().map(|url| async move {
      let request = HttpRequest::get(url);
      (url, transport.send(&request).await)
    });

    let mut report = InstallReport::default();
    for (url, outcome) in join_all(fetches).await {
      let reason = match outcome {
        Ok(response) if response.is_success() => {
          match self.storage.put(&self.static_cache, url, &response) {
            Ok(()) => {
              report.stored += 1;
              continue;
            }
            Err(e) => e.to_string(),
          }
        }
        Ok(response) => format!("status {}", response.status),
        Err(e) => e.to_string(),
      };
      tracing::warn!(url = %url, reason = %reason, "asset not cached at install");
      report.failed.push((url.clone(), reason));
    }

    tracing::info!(
      cache = %self.static_cache,
      stored = report.stored,
      failed = report.failed.len(),
      "static cache installed"
    );
    report
  }

  /// Whether the static bucket for the current version has any entries.
  pub fn is_installed(&self) -> Result<bool> {
    Ok(self.storage.entry_count(&self.static_cache)? > 0)
  }

  /// Delete every bucket that isn't one of the current version's two.
  ///
  /// Returns the names of the deleted buckets.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.cache_names()? {
      if name != self.static_cache && name != self.data_cache {
        tracing::info!(cache = %name, "deleting old cache");
        if self.storage.delete_cache(&name)? {
          deleted.push(name);
        }
      }
    }
    Ok(deleted)
  }

  /// Answer a request the way the fetch handler would.
  pub async fn fetch<T>(
    &self,
    transport: &T,
    request: &HttpRequest,
  ) -> Result<CacheResult<HttpResponse>, FetchError>
  where
    T: Transport + ?Sized,
  {
    if self.is_api(request) {
      if self.is_cacheable_api(request) {
        self.fetch_network_first(transport, request).await
      } else {
        transport.send(request).await.map(CacheResult::from_network)
      }
    } else {
      self.fetch_cache_first(transport, request).await
    }
  }

  /// API policy: network first, last stored response on network failure.
  async fn fetch_network_first<T>(
    &self,
    transport: &T,
    request: &HttpRequest,
  ) -> Result<CacheResult<HttpResponse>, FetchError>
  where
    T: Transport + ?Sized,
  {
    match transport.send(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&self.data_cache, &request.url, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(e) => match self.lookup(&self.data_cache, &request.url) {
        Some(hit) => {
          tracing::debug!(url = %request.url, "network failed, serving cached API response");
          Ok(CacheResult::offline(hit.response, hit.cached_at))
        }
        None => Err(e),
      },
    }
  }

  /// Static policy: any bucket first, then network, then the offline fallbacks.
  async fn fetch_cache_first<T>(
    &self,
    transport: &T,
    request: &HttpRequest,
  ) -> Result<CacheResult<HttpResponse>, FetchError>
  where
    T: Transport + ?Sized,
  {
    if !request.is_get() {
      return transport.send(request).await.map(CacheResult::from_network);
    }

    match self.storage.lookup_any(&request.url) {
      Ok(Some(hit)) => return Ok(CacheResult::from_cache(hit.response, hit.cached_at)),
      Ok(None) => {}
      Err(e) => tracing::warn!(url = %request.url, error = %e, "cache lookup failed"),
    }

    match transport.send(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&self.static_cache, &request.url, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        let fallback = match request.destination {
          Destination::Document => Some(&self.offline_page),
          Destination::Image => Some(&self.fallback_image),
          Destination::Other => None,
        };
        fallback
          .and_then(|url| self.lookup_any(url))
          .map(|hit| CacheResult::fallback(hit.response, hit.cached_at))
          .ok_or(e)
      }
    }
  }

  /// Re-fetch `urls` into the data bucket. Returns how many were refreshed.
  pub async fn refresh<T>(&self, transport: &T, urls: &[String]) -> usize
  where
    T: Transport + ?Sized,
  {
    let mut refreshed = 0;
    for url in urls {
      match transport.send(&HttpRequest::get(url)).await {
        Ok(response) if response.is_success() => {
          self.store(&self.data_cache, url, &response);
          refreshed += 1;
        }
        Ok(response) => {
          tracing::debug!(url = %url, status = response.status, "refresh skipped")
        }
        Err(e) => tracing::debug!(url = %url, error = %e, "refresh failed"),
      }
    }
    refreshed
  }

  fn store(&self, cache_name: &str, url: &str, response: &HttpResponse) {
    if let Err(e) = self.storage.put(cache_name, url, response) {
      tracing::warn!(cache = %cache_name, url = %url, error = %e, "failed to cache response");
    }
  }

  fn lookup(&self, cache_name: &str, url: &str) -> Option<super::CachedResponse> {
    self
      .storage
      .lookup(cache_name, url)
      .map_err(|e| tracing::warn!(url = %url, error = %e, "cache lookup failed"))
      .ok()
      .flatten()
  }

  fn lookup_any(&self, url: &str) -> Option<super::CachedResponse> {
    self
      .storage
      .lookup_any(url)
      .map_err(|e| tracing::warn!(url = %url, error = %e, "cache lookup failed"))
      .ok()
      .flatten()
  }
}

impl<S: ResponseStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      static_cache: self.static_cache.clone(),
      data_cache: self.data_cache.clone(),
      api_prefix: self.api_prefix.clone(),
      api_allow: self.api_allow.clone(),
      offline_page: self.offline_page.clone(),
      fallback_image: self.fallback_image.clone(),
    }
  }
}
