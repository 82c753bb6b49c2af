// src/core/pulling.rs

//! One shard = one long-polling loop plus the cache entries it owns. Sharding bounds the
//! number of keys per probe request and isolates one shard's long-poll latency from the
//! rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::core::blob_store::BlobStore;
use crate::core::codec;
use crate::core::executor::RequestExecutor;
use crate::core::key::CompositeKey;
use crate::core::value_store::ValueStore;

/// Field separator used inside one probe line: `dataId WS group WS fingerprint WS namespace`.
const WS: char = '\u{02}';
/// Line separator between probe entries.
const LS: char = '\u{01}';

/// A changed key reported by the pulling loop, ready for the dispatcher.
#[derive(Debug, Clone)]
pub struct Notification {
    pub key: CompositeKey,
    pub content: Option<String>,
    pub fingerprint: Option<String>,
}

struct CacheEntry {
    fingerprint: Option<String>,
    is_initial: bool,
}

/// Handle held by the Watch Registry: lets it resize the shard's key list and tear it
/// down, without reaching into the shard's internals.
pub struct ShardHandle {
    keys: Arc<SyncMutex<Vec<CompositeKey>>>,
    handle: JoinHandle<()>,
}

impl ShardHandle {
    pub fn key_count(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn add_key(&self, key: CompositeKey) {
        self.keys.lock().push(key);
    }

    pub fn remove_key(&self, key: &CompositeKey) {
        self.keys.lock().retain(|k| k != key);
    }

    pub fn terminate(&self) {
        self.handle.abort();
    }

    /// Spawns a shard that does nothing but hold its key list, for registry-level tests
    /// that only care about shard bookkeeping, not network behaviour.
    #[cfg(test)]
    pub fn new_for_test(keys: Vec<CompositeKey>) -> Self {
        let keys = Arc::new(SyncMutex::new(keys));
        let handle = tokio::spawn(std::future::pending());
        Self { keys, handle }
    }
}

/// Spawns a real pulling shard against the live collaborators, returning the handle the
/// Watch Registry uses to manage it.
pub fn spawn_shard(
    initial_keys: Vec<CompositeKey>,
    executor: Arc<RequestExecutor>,
    value_store: Arc<ValueStore>,
    failover: Arc<BlobStore>,
    snapshot: Arc<BlobStore>,
    pulling_timeout: Duration,
    queue: mpsc::UnboundedSender<Notification>,
) -> ShardHandle {
    let keys = Arc::new(SyncMutex::new(initial_keys));
    let shard_keys = keys.clone();
    let handle = tokio::spawn(async move {
        run_shard(shard_keys, executor, value_store, failover, snapshot, pulling_timeout, queue).await;
    });
    ShardHandle { keys, handle }
}

async fn run_shard(
    keys: Arc<SyncMutex<Vec<CompositeKey>>>,
    executor: Arc<RequestExecutor>,
    value_store: Arc<ValueStore>,
    failover: Arc<BlobStore>,
    snapshot: Arc<BlobStore>,
    pulling_timeout: Duration,
    queue: mpsc::UnboundedSender<Notification>,
) {
    let mut cache: HashMap<CompositeKey, CacheEntry> = HashMap::new();

    loop {
        let snapshot_keys = keys.lock().clone();
        if snapshot_keys.is_empty() {
            return;
        }

        reconcile_cache(&mut cache, &snapshot_keys, &failover, &snapshot).await;

        let probe = build_probe_string(&snapshot_keys, &cache);
        let any_initial = cache.values().any(|e| e.is_initial);

        let long_polling_timeout_ms = pulling_timeout.as_millis().to_string();
        let no_hangup = any_initial.to_string();
        let headers = [
            ("longPullingTimeout", long_polling_timeout_ms.as_str()),
            ("longPullingNoHangUp", no_hangup.as_str()),
        ];
        let probe_field: [(&str, &[u8]); 1] = [("Probe-Modify-Request", probe.as_bytes())];

        let request_timeout = pulling_timeout + Duration::from_secs(10);
        let result = executor
            .execute("/diamond-server/config.co", &[], &headers, Some(&probe_field), request_timeout)
            .await;

        let changed_keys = match result {
            Ok(resp) if resp.is_success() => parse_changed_keys(&resp.body),
            Ok(resp) => {
                warn!("pulling: probe returned status {}", resp.status);
                Vec::new()
            }
            Err(e) => {
                warn!("pulling: probe request failed: {e}");
                Vec::new()
            }
        };

        for entry in cache.values_mut() {
            entry.is_initial = false;
        }

        for key in changed_keys {
            let content = value_store.get(&key.data_id, &key.group, None, false).await.ok().flatten();
            let fingerprint = content.as_deref().map(codec::fingerprint);
            if let Some(entry) = cache.get_mut(&key) {
                entry.fingerprint = fingerprint.clone();
            }
            let _ = queue.send(Notification { key, content, fingerprint });
        }
    }
}

async fn reconcile_cache(
    cache: &mut HashMap<CompositeKey, CacheEntry>,
    current_keys: &[CompositeKey],
    failover: &BlobStore,
    snapshot: &BlobStore,
) {
    cache.retain(|k, _| current_keys.contains(k));

    for key in current_keys {
        if cache.contains_key(key) {
            continue;
        }
        let seed = match failover.read(&key.encode()).await {
            Some(bytes) => Some(bytes),
            None => snapshot.read(&key.encode()).await,
        };
        let fingerprint = seed.map(|bytes| codec::fingerprint_bytes(&bytes));
        cache.insert(
            key.clone(),
            CacheEntry {
                fingerprint,
                is_initial: true,
            },
        );
    }
}

fn build_probe_string(keys: &[CompositeKey], cache: &HashMap<CompositeKey, CacheEntry>) -> String {
    let mut probe = String::new();
    for key in keys {
        let fingerprint = cache.get(key).and_then(|e| e.fingerprint.as_deref()).unwrap_or("");
        probe.push_str(&key.data_id);
        probe.push(WS);
        probe.push_str(&key.group);
        probe.push(WS);
        probe.push_str(fingerprint);
        probe.push(WS);
        probe.push_str(&key.namespace);
        probe.push(LS);
    }
    probe
}

fn parse_changed_keys(body: &[u8]) -> Vec<CompositeKey> {
    let text = String::from_utf8_lossy(body);
    let decoded = urlencoding::decode(&text).map(|s| s.into_owned()).unwrap_or_else(|_| text.into_owned());

    decoded
        .split(LS)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.split(WS);
            let data_id = parts.next()?.to_string();
            let group = parts.next()?.to_string();
            let namespace = parts.next().unwrap_or("").to_string();
            Some(CompositeKey {
                data_id,
                group,
                namespace,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_string_uses_control_separators() {
        let keys = vec![CompositeKey::new("d1", "g1", "ns").unwrap()];
        let mut cache = HashMap::new();
        cache.insert(
            keys[0].clone(),
            CacheEntry {
                fingerprint: Some("abc123".to_string()),
                is_initial: false,
            },
        );
        let probe = build_probe_string(&keys, &cache);
        assert_eq!(probe, format!("d1{WS}g1{WS}abc123{WS}ns{LS}"));
    }

    #[test]
    fn probe_string_uses_empty_fingerprint_when_absent() {
        let keys = vec![CompositeKey::new("d1", "g1", "").unwrap()];
        let cache = HashMap::new();
        let probe = build_probe_string(&keys, &cache);
        assert_eq!(probe, format!("d1{WS}g1{WS}{WS}{LS}"));
    }

    #[test]
    fn parses_changed_keys_with_and_without_namespace() {
        let body = format!("d1{WS}g1{WS}ns1{LS}d2{WS}g2{LS}");
        let keys = parse_changed_keys(body.as_bytes());
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].namespace, "ns1");
        assert_eq!(keys[1].namespace, "");
    }

    #[test]
    fn ignores_blank_segments() {
        let body = format!("{LS}{LS}d1{WS}g1{WS}ns{LS}");
        let keys = parse_changed_keys(body.as_bytes());
        assert_eq!(keys.len(), 1);
    }
}
