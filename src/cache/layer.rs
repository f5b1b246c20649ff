//! Cache layer that orchestrates the install, intercept and reap steps.

use futures::future;
use reqwest::Method;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::CacheStore;
use super::traits::{Manifest, Request, RequestKey, Served};
use crate::error::{InstallError, NetworkError, StoreError};
use crate::network::Network;

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub tag: String,
  pub entries: usize,
  pub bytes: usize,
}

/// Cache layer that sits between the host and the network.
///
/// Every operation receives the generation tag it works on; the layer itself
/// holds no notion of a current version.
pub struct OfflineCache<S: CacheStore, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
}

impl<S: CacheStore, N: Network> OfflineCache<S, N> {
  /// Create a new cache layer with the given store and network.
  #[allow(dead_code)]
  pub fn new(storage: S, network: N) -> Self {
    Self::shared(Arc::new(storage), Arc::new(network))
  }

  /// Create a cache layer over a store shared with other worker versions.
  pub fn shared(storage: Arc<S>, network: Arc<N>) -> Self {
    Self { storage, network }
  }

  #[allow(dead_code)]
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Key a request is stored and matched under.
  ///
  /// Relative and absolute spellings of the same URL share a key, and the
  /// fragment never takes part in matching.
  pub fn key_for(&self, request: &Request) -> Result<RequestKey, NetworkError> {
    let url = self.network.resolve(&request.locator)?;
    Ok(RequestKey::resolved(request.method.clone(), url))
  }

  /// Populate generation `tag` with every manifest locator.
  ///
  /// All locators are fetched before anything is written, and the writes go
  /// to the store as one unit, so a failed install leaves no entries behind.
  /// Non-2xx answers count as failed fetches. Locators sharing a key are
  /// stored once.
  pub async fn install(&self, manifest: &Manifest, tag: &str) -> Result<InstallReport, InstallError> {
    info!(tag, assets = manifest.len(), "installing cache generation");
    self.storage.open_generation(tag)?;

    let fetches = manifest.iter().map(|locator| async move {
      let fetch_error = |source: NetworkError| InstallError::Fetch {
        locator: locator.to_string(),
        source,
      };
      let request = Request::get(locator);
      let key = self.key_for(&request).map_err(fetch_error)?;
      let response = self.network.send(&request).await.map_err(fetch_error)?;

      if !response.is_success() {
        return Err(InstallError::Status {
          locator: locator.to_string(),
          status: response.status,
        });
      }

      debug!(locator, status = response.status, "fetched manifest entry");
      Ok((key, response))
    });

    let mut entries = match future::try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(tag, error = %e, "install failed");
        return Err(e);
      }
    };

    let mut seen = HashSet::new();
    entries.retain(|(key, _)| seen.insert(key.clone()));

    self.storage.put_entries(tag, &entries)?;

    let report = InstallReport {
      tag: tag.to_string(),
      entries: entries.len(),
      bytes: entries.iter().map(|(_, r)| r.body.len()).sum(),
    };
    info!(tag, entries = report.entries, bytes = report.bytes, "install complete");
    Ok(report)
  }

  /// Answer one intercepted request.
  ///
  /// Non-GET requests go straight to the network without touching the store.
  /// GET requests are served from generation `tag` when present, otherwise
  /// forwarded to the network. Network answers are never written back.
  pub async fn handle_request(&self, request: &Request, tag: &str) -> Result<Served, NetworkError> {
    if request.method != Method::GET {
      debug!(method = %request.method, locator = %request.locator, "bypassing cache");
      return self.network.send(request).await.map(Served::bypass);
    }

    // An unresolvable locator is left for the network to reject
    if let Ok(key) = self.key_for(request) {
      match self.storage.lookup(tag, &key) {
        Ok(Some(stored)) => {
          debug!(locator = %request.locator, tag, "cache hit");
          return Ok(Served::from_cache(stored));
        }
        Ok(None) => debug!(locator = %request.locator, tag, "cache miss"),
        // A broken store degrades to network-only
        Err(e) => warn!(locator = %request.locator, error = %e, "cache read failed"),
      }
    }

    self.network.send(request).await.map(Served::from_network)
  }

  /// Delete every generation except `keep_tag`. Returns the reaped tags.
  pub async fn reap_generations(&self, keep_tag: &str) -> Result<Vec<String>, StoreError> {
    let mut reaped = Vec::new();

    for tag in self.storage.list_generations()? {
      if tag == keep_tag {
        continue;
      }
      if self.storage.delete_generation(&tag)? {
        info!(tag = %tag, "reaped cache generation");
        reaped.push(tag);
      }
    }

    Ok(reaped)
  }
}

impl<S: CacheStore, N: Network> Clone for OfflineCache<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
    }
  }
}
