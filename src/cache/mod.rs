//! Generational offline cache.
//!
//! This module provides the caching lifecycle for the dashboard assets:
//! - Installs a manifest of assets into a tagged cache generation
//! - Intercepts requests, serving GET hits from the current generation only
//! - Falls through to the network on a miss, without writing back
//! - Reaps every generation other than the current one on upgrade

mod layer;
mod storage;
mod traits;

pub use layer::{InstallReport, OfflineCache};
pub use storage::{CacheStore, SqliteStore};
pub use traits::{Manifest, Request, Response, Served};

#[cfg(test)]
pub use traits::{ResponseSource, DEFAULT_MANIFEST};
