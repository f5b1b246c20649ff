//! Network side of the interceptor.

use std::future::Future;
use url::Url;

use crate::cache::{Request, Response};
use crate::error::NetworkError;

/// Anything that can answer a request from outside the cache.
pub trait Network: Send + Sync {
  /// Absolute URL a locator refers to, as the host would fetch it.
  fn resolve(&self, locator: &str) -> Result<Url, NetworkError>;

  /// Forward a request unmodified and capture the response.
  fn send(&self, request: &Request) -> impl Future<Output = Result<Response, NetworkError>> + Send;
}

/// HTTP network resolving locators against the application origin.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: &str) -> Result<Self, NetworkError> {
    let origin = Url::parse(origin).map_err(|source| NetworkError::InvalidOrigin {
      origin: origin.to_string(),
      source,
    })?;

    let client = reqwest::Client::builder()
      .user_agent(concat!("ulisse-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(NetworkError::Client)?;

    Ok(Self { client, origin })
  }
}

/// Join a locator onto an origin. Absolute URLs pass through as-is.
fn join_origin(origin: &Url, locator: &str) -> Result<Url, NetworkError> {
  origin
    .join(locator)
    .map_err(|source| NetworkError::InvalidLocator {
      locator: locator.to_string(),
      source,
    })
}

impl Network for HttpNetwork {
  fn resolve(&self, locator: &str) -> Result<Url, NetworkError> {
    join_origin(&self.origin, locator)
  }

  async fn send(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = self.resolve(&request.locator)?;

    let mut builder = self.client.request(request.method.clone(), url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let transport = |source: reqwest::Error| {
      if source.is_connect() {
        NetworkError::Offline {
          locator: request.locator.clone(),
        }
      } else {
        NetworkError::Transport {
          url: url.to_string(),
          source,
        }
      }
    };

    let response = builder.send().await.map_err(transport)?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response.bytes().await.map_err(transport)?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_relative_locator() {
    let network = HttpNetwork::new("https://ulisse.example.com").unwrap();
    let url = network.resolve("/dashboard/logo192.png").unwrap();
    assert_eq!(url.as_str(), "https://ulisse.example.com/dashboard/logo192.png");
  }

  #[test]
  fn test_resolve_keeps_query_and_absolute_urls() {
    let network = HttpNetwork::new("https://ulisse.example.com/app/").unwrap();

    let url = network.resolve("/dashboard/manifest.json?v=3").unwrap();
    assert_eq!(url.as_str(), "https://ulisse.example.com/dashboard/manifest.json?v=3");

    let url = network.resolve("https://cdn.example.com/bundle.js").unwrap();
    assert_eq!(url.as_str(), "https://cdn.example.com/bundle.js");
  }

  #[test]
  fn test_invalid_origin() {
    assert!(matches!(
      HttpNetwork::new("not a url"),
      Err(NetworkError::InvalidOrigin { .. })
    ));
  }
}
