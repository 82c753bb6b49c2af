// src/core/dispatch.rs

//! Drains the notification queue and invokes watcher callbacks on a bounded worker
//! pool, filtering out redundant deliveries by comparing fingerprints.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::core::pulling::Notification;
use crate::core::watch::{CallbackId, WatchRegistry};

/// The payload handed to a user callback on change delivery.
#[derive(Debug, Clone)]
pub struct NotifyParams {
    pub data_id: String,
    pub group: String,
    pub namespace: String,
    pub content: Option<String>,
}

pub type Callback = Arc<dyn Fn(NotifyParams) + Send + Sync>;

/// Maps opaque callback identities to the closures the Watch Registry only knows by id.
/// Separated from `WatchRegistry` so the registry's locking stays scoped to bookkeeping,
/// never to user code.
#[derive(Default)]
pub struct CallbackRegistry {
    next_id: AtomicU64,
    callbacks: SyncMutex<HashMap<CallbackId, Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, callback: Callback) -> CallbackId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().insert(id, callback);
        id
    }

    pub fn get(&self, id: CallbackId) -> Option<Callback> {
        self.callbacks.lock().get(&id).cloned()
    }
}

/// Spawns the single dispatcher task. Its lifetime is owned by the returned handle;
/// dropping the sender half of `queue` (done on client teardown) lets it drain and exit.
pub fn spawn_dispatcher(
    mut queue: mpsc::UnboundedReceiver<Notification>,
    registry: Arc<WatchRegistry>,
    callbacks: Arc<CallbackRegistry>,
    callback_thread_num: usize,
) -> JoinHandle<()> {
    let worker_pool = Arc::new(Semaphore::new(callback_thread_num.max(1)));
    tokio::spawn(async move {
        while let Some(note) = queue.recv().await {
            let watchers = registry.watchers_for(&note.key);
            if watchers.is_empty() {
                continue;
            }

            let params = NotifyParams {
                data_id: note.key.data_id.clone(),
                group: note.key.group.clone(),
                namespace: note.key.namespace.clone(),
                content: note.content.clone(),
            };

            for watcher in watchers {
                if watcher.last == note.fingerprint {
                    continue;
                }
                let Some(callback) = callbacks.get(watcher.callback) else {
                    continue;
                };
                registry.record_delivery(&note.key, watcher.callback, note.fingerprint.clone());

                let permit = match worker_pool.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return, // pool closed: dispatcher is shutting down.
                };
                let params = params.clone();
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    if std::panic::catch_unwind(AssertUnwindSafe(|| callback(params))).is_err() {
                        warn!("notification callback panicked");
                    }
                });
            }
        }
    })
}
