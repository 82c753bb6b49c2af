// src/core/watch.rs

//! Tracks which callbacks are interested in which keys, and which pulling shard owns
//! each key. At most one shard per key; a watcher-less key is dropped from both maps.
//!
//! All bookkeeping here is in-memory map mutation with no blocking I/O, so it runs
//! under a plain `parking_lot` mutex rather than an async one — this also lets the
//! client facade tear the registry down synchronously from `Drop`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::core::key::CompositeKey;
use crate::core::pulling::ShardHandle;

/// Identifies a registered callback so `RemoveWatcher` can find it again. The embedding
/// crate supplies this; the watch registry never calls the callback itself, it only
/// tracks identity and the last-delivered fingerprint.
pub type CallbackId = u64;

#[derive(Debug, Clone)]
pub struct WatcherRecord {
    pub callback: CallbackId,
    pub last: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    watchers: HashMap<CompositeKey, Vec<WatcherRecord>>,
    shard_of: HashMap<CompositeKey, usize>,
    shards: Vec<ShardHandle>,
}

/// `AddWatcher`/`RemoveWatcher` plus shard assignment, guarded by a single mutex —
/// mirroring the single-lock-per-shard-map design described for the pulling engine.
pub struct WatchRegistry {
    state: Mutex<RegistryState>,
    pulling_config_size: usize,
    spawn_shard: Box<dyn Fn(Vec<CompositeKey>) -> ShardHandle + Send + Sync>,
}

impl WatchRegistry {
    pub fn new(
        pulling_config_size: usize,
        spawn_shard: impl Fn(Vec<CompositeKey>) -> ShardHandle + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            pulling_config_size,
            spawn_shard: Box::new(spawn_shard),
        })
    }

    /// Registers `callback` for `key`, assigning the key to an existing shard with
    /// spare capacity or spawning a new shard.
    pub fn add_watcher(&self, key: CompositeKey, callback: CallbackId) {
        let mut state = self.state.lock();
        state
            .watchers
            .entry(key.clone())
            .or_default()
            .push(WatcherRecord { callback, last: None });

        if state.shard_of.contains_key(&key) {
            return;
        }

        let target_shard = state
            .shards
            .iter()
            .position(|shard| shard.key_count() < self.pulling_config_size);

        match target_shard {
            Some(idx) => {
                state.shards[idx].add_key(key.clone());
                state.shard_of.insert(key, idx);
            }
            None => {
                let idx = state.shards.len();
                let handle = (self.spawn_shard)(vec![key.clone()]);
                state.shards.push(handle);
                state.shard_of.insert(key, idx);
                info!("watch-registry: spawned shard {idx}");
            }
        }
    }

    /// Removes the first matching watcher (or all matching, if `remove_all`) registered
    /// for `key` under `callback`. Drops the key entirely, including from its shard, once
    /// its watcher list becomes empty.
    pub fn remove_watcher(&self, key: &CompositeKey, callback: CallbackId, remove_all: bool) {
        let mut state = self.state.lock();
        let Some(records) = state.watchers.get_mut(key) else {
            return;
        };

        if remove_all {
            records.retain(|r| r.callback != callback);
        } else if let Some(pos) = records.iter().position(|r| r.callback == callback) {
            records.remove(pos);
        }

        if !records.is_empty() {
            return;
        }

        state.watchers.remove(key);
        if let Some(idx) = state.shard_of.remove(key) {
            let empty = {
                let shard = &state.shards[idx];
                shard.remove_key(key);
                shard.key_count() == 0
            };
            if empty {
                state.shards[idx].terminate();
                info!("watch-registry: shard {idx} emptied, terminated");
            }
        }
    }

    pub fn watchers_for(&self, key: &CompositeKey) -> Vec<WatcherRecord> {
        self.state.lock().watchers.get(key).cloned().unwrap_or_default()
    }

    pub fn record_delivery(&self, key: &CompositeKey, callback: CallbackId, fingerprint: Option<String>) {
        let mut state = self.state.lock();
        if let Some(records) = state.watchers.get_mut(key) {
            for record in records.iter_mut().filter(|r| r.callback == callback) {
                record.last = fingerprint.clone();
            }
        }
    }

    /// Terminates every shard task. Safe to call more than once; safe to call from `Drop`.
    pub fn shutdown(&self) {
        for shard in &self.state.lock().shards {
            shard.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pulling::ShardHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_key(n: u32) -> CompositeKey {
        CompositeKey::new(format!("d{n}"), "g", "").unwrap()
    }

    fn counting_spawner() -> (Arc<AtomicUsize>, impl Fn(Vec<CompositeKey>) -> ShardHandle) {
        let spawn_count = Arc::new(AtomicUsize::new(0));
        let counter = spawn_count.clone();
        let spawner = move |keys: Vec<CompositeKey>| {
            counter.fetch_add(1, Ordering::SeqCst);
            ShardHandle::new_for_test(keys)
        };
        (spawn_count, spawner)
    }

    #[tokio::test]
    async fn first_watcher_spawns_a_shard() {
        let (spawn_count, spawner) = counting_spawner();
        let registry = WatchRegistry::new(3000, spawner);
        registry.add_watcher(test_key(1), 42);
        assert_eq!(spawn_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_key_reuses_shard_with_capacity() {
        let (spawn_count, spawner) = counting_spawner();
        let registry = WatchRegistry::new(3000, spawner);
        registry.add_watcher(test_key(1), 1);
        registry.add_watcher(test_key(2), 2);
        assert_eq!(spawn_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_shard_spawns_a_new_one() {
        let (spawn_count, spawner) = counting_spawner();
        let registry = WatchRegistry::new(1, spawner);
        registry.add_watcher(test_key(1), 1);
        registry.add_watcher(test_key(2), 2);
        assert_eq!(spawn_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remove_watcher_prunes_empty_key() {
        let (_spawn_count, spawner) = counting_spawner();
        let registry = WatchRegistry::new(3000, spawner);
        let key = test_key(1);
        registry.add_watcher(key.clone(), 1);
        registry.add_watcher(key.clone(), 2);
        registry.add_watcher(key.clone(), 3);

        registry.remove_watcher(&key, 1, false);
        assert_eq!(registry.watchers_for(&key).len(), 2);

        registry.remove_watcher(&key, 2, true);
        assert_eq!(registry.watchers_for(&key).len(), 1);
    }

    #[tokio::test]
    async fn removing_last_watcher_drops_key_entirely() {
        let (_spawn_count, spawner) = counting_spawner();
        let registry = WatchRegistry::new(3000, spawner);
        let key = test_key(1);
        registry.add_watcher(key.clone(), 1);
        registry.remove_watcher(&key, 1, false);
        assert!(registry.watchers_for(&key).is_empty());
    }
}
