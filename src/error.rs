//! Error types for the offline cache.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the durable cache store.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("could not determine data directory")]
  NoDataDir,

  #[error("failed to create cache directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("cache store failed to {context}: {source}")]
  Sqlite {
    context: &'static str,
    #[source]
    source: rusqlite::Error,
  },

  #[error("cache store lock poisoned")]
  LockPoisoned,

  #[error("failed to encode stored headers: {0}")]
  Headers(#[from] serde_json::Error),

  #[error("failed to parse stored timestamp '{0}'")]
  Timestamp(String),
}

impl StoreError {
  /// Adapter for `map_err` on rusqlite calls.
  pub(crate) fn sqlite(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
    move |source| Self::Sqlite { context, source }
  }
}

/// Failures reaching the network. These are passed through to the requester
/// untouched; they are never interceptor failures.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("invalid origin '{origin}': {source}")]
  InvalidOrigin {
    origin: String,
    #[source]
    source: url::ParseError,
  },

  #[error("cannot resolve locator '{locator}': {source}")]
  InvalidLocator {
    locator: String,
    #[source]
    source: url::ParseError,
  },

  #[error("failed to build HTTP client: {0}")]
  Client(#[source] reqwest::Error),

  #[error("network unreachable for {locator}")]
  Offline { locator: String },

  #[error("request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },
}

/// Failures of the install step. Any of them fails the whole installation.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error("failed to fetch manifest entry {locator}: {source}")]
  Fetch {
    locator: String,
    #[source]
    source: NetworkError,
  },

  #[error("manifest entry {locator} answered with status {status}")]
  Status { locator: String, status: u16 },

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Failures reported to a host waiting on a lifecycle event.
#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("worker stopped before the {0} event completed")]
  WorkerStopped(&'static str),

  #[error(transparent)]
  Install(#[from] InstallError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Network(#[from] NetworkError),
}
