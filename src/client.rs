// src/client.rs

//! The public facade: wires the server pool, request executor, value store, watch
//! registry, pulling engine, and notification dispatcher behind a single handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::core::blob_store::BlobStore;
use crate::core::dispatch::{self, Callback, CallbackRegistry, NotifyParams};
use crate::core::executor::RequestExecutor;
use crate::core::key::CompositeKey;
use crate::core::pool::ServerPool;
use crate::core::pulling::{self, Notification};
use crate::core::value_store::{ConfigItem, ConfigListing, ValueStore};
use crate::core::watch::{CallbackId, WatchRegistry};
use crate::error::Result;

/// A config client bound to one endpoint/namespace. Cheap to clone (every field is an
/// `Arc`); share one instance across the application instead of constructing many.
pub struct AcmClient {
    config: Arc<ClientConfig>,
    pool: Arc<ServerPool>,
    executor: Arc<RequestExecutor>,
    failover: Arc<BlobStore>,
    snapshot: Arc<BlobStore>,
    value_store: Arc<ValueStore>,
    watch_registry: OnceCell<Arc<WatchRegistry>>,
    callbacks: OnceCell<Arc<CallbackRegistry>>,
    dispatcher_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl AcmClient {
    /// Builds C1 (failover/snapshot paths) and C3 (an empty, lazily-resolved server
    /// pool) eagerly. C7/C8 (the pulling engine and dispatcher) stay uninitialized
    /// until the first [`AcmClient::add_watcher`] call.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let config = Arc::new(config);
        let http = reqwest::Client::new();
        let pool = ServerPool::new(http, config.endpoint.clone(), config.default_port(), config.cai_enabled);
        let executor = Arc::new(RequestExecutor::new(pool.clone(), config.clone())?);
        let failover = Arc::new(BlobStore::new(config.failover_base.clone()));
        let snapshot = Arc::new(BlobStore::new(config.snapshot_base.clone()));
        let value_store = Arc::new(ValueStore::new(
            executor.clone(),
            failover.clone(),
            snapshot.clone(),
            config.namespace.clone(),
        ));

        Ok(Self {
            config,
            pool,
            executor,
            failover,
            snapshot,
            value_store,
            watch_registry: OnceCell::new(),
            callbacks: OnceCell::new(),
            dispatcher_handle: parking_lot::Mutex::new(None),
        })
    }

    pub async fn get(&self, data_id: &str, group: &str) -> Result<Option<String>> {
        self.value_store.get(data_id, group, None, false).await
    }

    pub async fn get_with_options(
        &self,
        data_id: &str,
        group: &str,
        timeout: Option<Duration>,
        no_snapshot: bool,
    ) -> Result<Option<String>> {
        self.value_store.get(data_id, group, timeout, no_snapshot).await
    }

    pub async fn publish(&self, data_id: &str, group: &str, content: &str) -> Result<()> {
        self.value_store.publish(data_id, group, Some(content), None).await
    }

    pub async fn remove(&self, data_id: &str, group: &str) -> Result<()> {
        self.value_store.remove(data_id, group, None).await
    }

    pub async fn list(&self, page: u32, size: u32) -> Result<ConfigListing> {
        self.value_store.list(page, size).await
    }

    pub async fn list_all(&self, group: Option<&str>, prefix: Option<&str>) -> Result<Vec<ConfigItem>> {
        self.value_store.list_all(group, prefix).await
    }

    /// Registers `callback` to be invoked whenever `(data_id, group)` changes, bootstrap
    /// the pulling engine and notification dispatcher on the first call. Returns an id
    /// usable with [`AcmClient::remove_watcher`].
    pub async fn add_watcher(
        &self,
        data_id: &str,
        group: &str,
        callback: impl Fn(NotifyParams) + Send + Sync + 'static,
    ) -> Result<CallbackId> {
        let ids = self.add_watchers(data_id, group, vec![Arc::new(callback) as Callback]).await?;
        Ok(ids[0])
    }

    /// Registers every callback in `callbacks` for `(data_id, group)` in one shot,
    /// bootstrapping the pulling engine and notification dispatcher on the first call.
    /// Returns one id per callback, usable with [`AcmClient::remove_watcher`].
    pub async fn add_watchers(
        &self,
        data_id: &str,
        group: &str,
        callbacks: Vec<Callback>,
    ) -> Result<Vec<CallbackId>> {
        let key = CompositeKey::new(data_id, group, self.config.effective_namespace())?;
        let (registry, callback_registry) = self.ensure_pulling_bootstrap().await;
        let ids: Vec<CallbackId> = callbacks.into_iter().map(|cb| callback_registry.register(cb)).collect();
        for &id in &ids {
            registry.add_watcher(key.clone(), id);
        }
        Ok(ids)
    }

    /// Removes the first matching (or all, if `remove_all`) watcher registered for
    /// `(data_id, group)` under `callback`. A no-op if the pulling engine was never
    /// bootstrapped (no watcher was ever added).
    pub async fn remove_watcher(
        &self,
        data_id: &str,
        group: &str,
        callback: CallbackId,
        remove_all: bool,
    ) -> Result<()> {
        let key = CompositeKey::new(data_id, group, self.config.effective_namespace())?;
        if let Some(registry) = self.watch_registry.get() {
            registry.remove_watcher(&key, callback, remove_all);
        }
        Ok(())
    }

    async fn ensure_pulling_bootstrap(&self) -> (Arc<WatchRegistry>, Arc<CallbackRegistry>) {
        let callbacks = self.callbacks.get_or_init(|| async { CallbackRegistry::new() }).await.clone();

        let registry = self
            .watch_registry
            .get_or_init(|| async {
                let (tx, rx) = mpsc::unbounded_channel::<Notification>();
                let executor = self.executor.clone();
                let value_store = self.value_store.clone();
                let failover = self.failover.clone();
                let snapshot = self.snapshot.clone();
                let pulling_timeout = self.config.pulling_timeout;
                let shard_tx = tx.clone();

                let spawner = move |keys: Vec<CompositeKey>| {
                    pulling::spawn_shard(
                        keys,
                        executor.clone(),
                        value_store.clone(),
                        failover.clone(),
                        snapshot.clone(),
                        pulling_timeout,
                        shard_tx.clone(),
                    )
                };

                let registry = WatchRegistry::new(self.config.pulling_config_size, spawner);
                let handle = dispatch::spawn_dispatcher(
                    rx,
                    registry.clone(),
                    callbacks.clone(),
                    self.config.callback_thread_num,
                );
                *self.dispatcher_handle.lock() = Some(handle);
                registry
            })
            .await
            .clone();

        (registry, callbacks)
    }

    /// Cancels every background task owned by this client: the server pool's refresh
    /// loop, every pulling shard, and the notification dispatcher. Idempotent.
    /// Dropping the client has the same effect; call this explicitly when the client's
    /// lifetime doesn't already line up with teardown (e.g. a client rebuilt mid-process).
    pub fn close(&self) {
        self.pool.shutdown();
        if let Some(registry) = self.watch_registry.get() {
            registry.shutdown();
        }
        if let Some(handle) = self.dispatcher_handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for AcmClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(endpoint: &str, failover_dir: &TempDir, snapshot_dir: &TempDir) -> ClientConfig {
        ClientConfig::builder(endpoint)
            .namespace("ns")
            .failover_base(failover_dir.path())
            .snapshot_base(snapshot_dir.path())
            .cai_enabled(false)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn get_returns_server_value_and_writes_snapshot() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/diamond-server/config.co"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&mock)
            .await;

        let failover_dir = TempDir::new().unwrap();
        let snapshot_dir = TempDir::new().unwrap();
        let endpoint = mock.uri().trim_start_matches("http://").to_string();
        let client = AcmClient::new(test_config(&endpoint, &failover_dir, &snapshot_dir)).unwrap();

        let value = client.get("d", "g").await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn add_watcher_bootstraps_pulling_once() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/diamond-server/config.co"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&mock)
            .await;

        let failover_dir = TempDir::new().unwrap();
        let snapshot_dir = TempDir::new().unwrap();
        let endpoint = mock.uri().trim_start_matches("http://").to_string();
        let client = AcmClient::new(test_config(&endpoint, &failover_dir, &snapshot_dir)).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_cb = calls.clone();
        client
            .add_watcher("d", "g", move |_params| {
                calls_for_cb.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert!(client.watch_registry.get().is_some());

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        client.close();
    }

    #[tokio::test]
    async fn add_watchers_registers_every_callback_under_one_key() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/diamond-server/config.co"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&mock)
            .await;

        let failover_dir = TempDir::new().unwrap();
        let snapshot_dir = TempDir::new().unwrap();
        let endpoint = mock.uri().trim_start_matches("http://").to_string();
        let client = AcmClient::new(test_config(&endpoint, &failover_dir, &snapshot_dir)).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let make_cb = |calls: Arc<AtomicUsize>| {
            Arc::new(move |_params: NotifyParams| {
                calls.fetch_add(1, Ordering::SeqCst);
            }) as Callback
        };
        let ids = client
            .add_watchers("d", "g", vec![make_cb(calls.clone()), make_cb(calls.clone())])
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        client.close();
    }
}
