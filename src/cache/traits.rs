//! Core types for the caching system.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

/// Header pairs in wire order. Duplicate names are kept.
pub type Headers = Vec<(String, String)>;

/// Assets pre-cached by a default install.
pub const DEFAULT_MANIFEST: [&str; 5] = [
  "/dashboard/voice-creator",
  "/dashboard/static/js/bundle.js",
  "/dashboard/manifest.json",
  "/dashboard/logo192.png",
  "/dashboard/logo512.png",
];

/// An outgoing request routed through the interceptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  /// Target locator, either origin-relative (`/dashboard/x`) or absolute
  pub locator: String,
  /// Forwarded to the network, never used for matching
  pub headers: Headers,
}

impl Request {
  pub fn new(method: Method, locator: impl Into<String>) -> Self {
    Self {
      method,
      locator: locator.into(),
      headers: Vec::new(),
    }
  }

  pub fn get(locator: impl Into<String>) -> Self {
    Self::new(Method::GET, locator)
  }
}

/// Exact-match identity of a request: method plus resolved URL, query
/// included, fragment dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: Method,
  locator: String,
}

impl RequestKey {
  /// Key for a request to an already resolved URL.
  pub fn resolved(method: Method, mut url: Url) -> Self {
    url.set_fragment(None);
    Self::new(method, String::from(url))
  }

  pub fn new(method: Method, locator: impl Into<String>) -> Self {
    Self {
      method,
      locator: locator.into(),
    }
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn locator(&self) -> &str {
    &self.locator
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.locator.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A captured network response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  #[allow(dead_code)]
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[allow(dead_code)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx statuses. Anything else fails an install.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// A response held by a cache generation.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub response: Response,
  /// When the entry was written. Informational only, entries never expire.
  pub cached_at: DateTime<Utc>,
}

/// The fixed, ordered list of locators populated at install time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<String>);

impl Manifest {
  pub fn new<I, L>(locators: I) -> Self
  where
    I: IntoIterator<Item = L>,
    L: Into<String>,
  {
    Self(locators.into_iter().map(Into::into).collect())
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }
}

impl Default for Manifest {
  fn default() -> Self {
    Self::new(DEFAULT_MANIFEST)
  }
}

/// Response handed back to the requester, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the entry was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_cache(stored: StoredResponse) -> Self {
    Self {
      response: stored.response,
      source: ResponseSource::Cache,
      cached_at: Some(stored.cached_at),
    }
  }

  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn bypass(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Bypass,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Hit in the current generation
  Cache,
  /// GET that missed the cache and went to the network
  Network,
  /// Non-GET request, never looked up
  Bypass,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Cache => "cache",
      Self::Network => "network",
      Self::Bypass => "bypass",
    };
    f.write_str(label)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_hash_depends_on_method_and_locator() {
    let get = RequestKey::new(Method::GET, "/dashboard/logo192.png");
    let post = RequestKey::new(Method::POST, "/dashboard/logo192.png");
    let other = RequestKey::new(Method::GET, "/dashboard/logo512.png");

    assert_eq!(get.cache_hash(), RequestKey::new(Method::GET, "/dashboard/logo192.png").cache_hash());
    assert_ne!(get.cache_hash(), post.cache_hash());
    assert_ne!(get.cache_hash(), other.cache_hash());
    assert_eq!(get.cache_hash().len(), 64);
  }

  #[test]
  fn test_resolved_key_drops_fragment_only() {
    let url = |s: &str| Url::parse(s).unwrap();

    let plain = RequestKey::resolved(Method::GET, url("http://localhost:8000/dashboard/logo192.png"));
    let fragment = RequestKey::resolved(Method::GET, url("http://localhost:8000/dashboard/logo192.png#top"));
    let query = RequestKey::resolved(Method::GET, url("http://localhost:8000/dashboard/logo192.png?v=2"));

    assert_eq!(plain, fragment);
    assert_eq!(plain.locator(), "http://localhost:8000/dashboard/logo192.png");
    assert_ne!(plain, query);
  }

  #[test]
  fn test_default_manifest_order() {
    let manifest = Manifest::default();
    assert_eq!(manifest.len(), 5);
    assert_eq!(manifest.iter().next(), Some("/dashboard/voice-creator"));
    assert_eq!(manifest.iter().last(), Some("/dashboard/logo512.png"));
  }

  #[test]
  fn test_success_range() {
    assert!(Response::new(200, "").is_success());
    assert!(Response::new(204, "").is_success());
    assert!(!Response::new(304, "").is_success());
    assert!(!Response::new(404, "").is_success());
  }
}
