use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::{CacheStore, InstallReport, Manifest, OfflineCache, Request, Served};
use crate::error::{InstallError, LifecycleError, NetworkError, StoreError};
use crate::network::Network;

/// Lifecycle events raised by the host.
///
/// Each event carries the channel its result is reported on. The result is
/// only sent once the unit of work is complete, which is how the host waits
/// for install and activation to finish.
#[derive(Debug)]
pub enum LifecycleEvent {
  /// Populate the current generation from the manifest
  Install {
    reply: oneshot::Sender<Result<InstallReport, InstallError>>,
  },
  /// Take control: reap every generation but the current one
  Activate {
    reply: oneshot::Sender<Result<Vec<String>, StoreError>>,
  },
  /// An outgoing request to intercept
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Served, NetworkError>>,
  },
}

/// One interceptor version bound to a generation tag.
///
/// Install and activate are handled one at a time in arrival order. Fetches
/// are spawned so concurrent requests overlap.
pub struct Worker<S: CacheStore, N: Network> {
  cache: OfflineCache<S, N>,
  manifest: Manifest,
  tag: String,
  rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl<S, N> Worker<S, N>
where
  S: CacheStore + 'static,
  N: Network + 'static,
{
  /// Start a worker for `tag` and return the handle the host talks to.
  pub fn spawn(
    cache: OfflineCache<S, N>,
    manifest: Manifest,
    tag: impl Into<String>,
  ) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Self {
      cache,
      manifest,
      tag: tag.into(),
      rx,
    };

    (WorkerHandle { tx }, tokio::spawn(worker.run()))
  }

  /// Process events until every handle is dropped.
  async fn run(mut self) {
    info!(tag = %self.tag, "worker started");

    while let Some(event) = self.rx.recv().await {
      match event {
        LifecycleEvent::Install { reply } => {
          let result = self.cache.install(&self.manifest, &self.tag).await;
          if let Err(e) = &result {
            error!(tag = %self.tag, error = %e, "install event failed");
          }
          let _ = reply.send(result);
        }
        LifecycleEvent::Activate { reply } => {
          let result = self.cache.reap_generations(&self.tag).await;
          match &result {
            Ok(reaped) => info!(tag = %self.tag, reaped = reaped.len(), "worker activated"),
            Err(e) => error!(tag = %self.tag, error = %e, "activate event failed"),
          }
          let _ = reply.send(result);
        }
        LifecycleEvent::Fetch { request, reply } => {
          tokio::spawn(respond(self.cache.clone(), self.tag.clone(), request, reply));
        }
      }
    }

    debug!(tag = %self.tag, "worker stopped");
  }
}

/// Answer one fetch event, abandoning the work if the requester goes away.
async fn respond<S: CacheStore, N: Network>(
  cache: OfflineCache<S, N>,
  tag: String,
  request: Request,
  mut reply: oneshot::Sender<Result<Served, NetworkError>>,
) {
  let outcome = tokio::select! {
    result = cache.handle_request(&request, &tag) => Some(result),
    _ = reply.closed() => None,
  };

  match outcome {
    Some(result) => {
      // Ignore send errors - requester may have been dropped
      let _ = reply.send(result);
    }
    None => debug!(locator = %request.locator, "fetch abandoned by requester"),
  }
}

/// Host-side handle that raises events and waits for their completion.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl WorkerHandle {
  pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
    let (reply, rx) = oneshot::channel();
    self.raise(LifecycleEvent::Install { reply }, "install")?;
    let report = rx
      .await
      .map_err(|_| LifecycleError::WorkerStopped("install"))??;
    Ok(report)
  }

  pub async fn activate(&self) -> Result<Vec<String>, LifecycleError> {
    let (reply, rx) = oneshot::channel();
    self.raise(LifecycleEvent::Activate { reply }, "activate")?;
    let reaped = rx
      .await
      .map_err(|_| LifecycleError::WorkerStopped("activate"))??;
    Ok(reaped)
  }

  pub async fn fetch(&self, request: Request) -> Result<Served, LifecycleError> {
    let (reply, rx) = oneshot::channel();
    self.raise(LifecycleEvent::Fetch { request, reply }, "fetch")?;
    let served = rx
      .await
      .map_err(|_| LifecycleError::WorkerStopped("fetch"))??;
    Ok(served)
  }

  fn raise(&self, event: LifecycleEvent, name: &'static str) -> Result<(), LifecycleError> {
    self
      .tx
      .send(event)
      .map_err(|_| LifecycleError::WorkerStopped(name))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseSource, SqliteStore};
  use crate::network::testing::FakeNetwork;
  use reqwest::Method;
  use std::sync::Arc;
  use std::time::Duration;

  const V1: &str = "ulisse-voice-cache-v1";
  const V2: &str = "ulisse-voice-cache-v2";

  fn spawn_worker(
    store: &Arc<SqliteStore>,
    network: &Arc<FakeNetwork>,
    tag: &str,
  ) -> (WorkerHandle, JoinHandle<()>) {
    let cache = OfflineCache::shared(Arc::clone(store), Arc::clone(network));
    Worker::spawn(cache, Manifest::default(), tag)
  }

  #[tokio::test]
  async fn test_full_lifecycle_and_upgrade() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::serving_manifest());

    let (v1, _) = spawn_worker(&store, &network, V1);
    let report = v1.install().await.unwrap();
    assert_eq!(report.entries, 5);
    assert!(v1.activate().await.unwrap().is_empty());

    let calls = network.call_count();
    let hit = v1.fetch(Request::get("/dashboard/logo192.png")).await.unwrap();
    assert_eq!(hit.source, ResponseSource::Cache);
    assert_eq!(network.call_count(), calls);

    let miss = v1.fetch(Request::get("/dashboard/unknown.png")).await.unwrap();
    assert_eq!(miss.source, ResponseSource::Network);
    assert_eq!(network.call_count(), calls + 1);
    assert_eq!(store.entry_count(V1).unwrap(), 5);

    let post = v1
      .fetch(Request::new(Method::POST, "/dashboard/voice-creator"))
      .await
      .unwrap();
    assert_eq!(post.source, ResponseSource::Bypass);
    assert_eq!(network.call_count(), calls + 2);

    // Upgrade: the new version installs next to the old one, then reaps it
    let (v2, _) = spawn_worker(&store, &network, V2);
    v2.install().await.unwrap();
    assert_eq!(store.list_generations().unwrap().len(), 2);

    let reaped = v2.activate().await.unwrap();
    assert_eq!(reaped, vec![V1.to_string()]);
    assert_eq!(store.list_generations().unwrap(), vec![V2.to_string()]);
  }

  #[tokio::test]
  async fn test_install_failure_reaches_host() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::serving_manifest().offline("/dashboard/static/js/bundle.js"));

    let (handle, _) = spawn_worker(&store, &network, V1);
    let err = handle.install().await.unwrap_err();

    assert!(matches!(
      err,
      LifecycleError::Install(InstallError::Fetch { .. })
    ));
    assert_eq!(store.entry_count(V1).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_do_not_block_each_other() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::serving_manifest().hanging("/dashboard/slow.js"));

    let (handle, _) = spawn_worker(&store, &network, V1);
    handle.install().await.unwrap();

    let slow = {
      let handle = handle.clone();
      tokio::spawn(async move { handle.fetch(Request::get("/dashboard/slow.js")).await })
    };

    let fast = tokio::time::timeout(
      Duration::from_secs(1),
      handle.fetch(Request::get("/dashboard/manifest.json")),
    )
    .await
    .expect("fetch blocked behind a pending request")
    .unwrap();
    assert_eq!(fast.source, ResponseSource::Cache);

    slow.abort();
  }

  #[tokio::test]
  async fn test_cancelled_fetch_is_abandoned() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::default().hanging("/dashboard/slow.js"));

    let (handle, _) = spawn_worker(&store, &network, V1);
    // Held by this test and by the worker's cache
    let idle = Arc::strong_count(&network);

    let (reply, rx) = oneshot::channel();
    handle
      .raise(
        LifecycleEvent::Fetch {
          request: Request::get("/dashboard/slow.js"),
          reply,
        },
        "fetch",
      )
      .unwrap();

    // Wait until the request reached the network, then cancel it
    while network.call_count() == 0 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(Arc::strong_count(&network), idle + 1);
    drop(rx);

    // The pending task lets go of its cache clone once abandoned
    tokio::time::timeout(Duration::from_secs(1), async {
      while Arc::strong_count(&network) > idle {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("abandoned fetch task never exited");

    // The worker keeps serving after an abandoned fetch
    let served = handle.fetch(Request::get("/dashboard/other.png")).await.unwrap();
    assert_eq!(served.response.status, 404);
  }

  #[tokio::test]
  async fn test_handle_reports_stopped_worker() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::serving_manifest());

    let (handle, join) = spawn_worker(&store, &network, V1);
    join.abort();
    let _ = join.await;

    assert!(matches!(
      handle.activate().await,
      Err(LifecycleError::WorkerStopped("activate"))
    ));
  }
}
