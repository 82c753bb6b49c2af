// src/core/blob_store.rs

//! Durable read/write/delete of bytes keyed by a composite string, under an advisory
//! exclusive file lock.
//!
//! Multiple processes on the same host (e.g. a worker fleet) can share a snapshot
//! directory; readers must never observe a half-written body. Locking and I/O are
//! blocking (`std::fs` + `fs2`) and run on the blocking thread pool so the async
//! runtime is never stalled by a contended lock.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

/// A durable blob store rooted at a fixed base directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base: PathBuf,
}

impl BlobStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Reads `key` from the store. Returns `Ok(None)` if the file is absent. Any other
    /// I/O failure is logged and also treated as absent, matching the original
    /// fail-open behaviour (a corrupt cache must never turn into a hard error).
    pub async fn read(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.base.join(key);
        tokio::task::spawn_blocking(move || read_blocking(&path))
            .await
            .unwrap_or_else(|join_err| {
                warn!("blob-store read task panicked: {join_err}");
                None
            })
    }

    /// Writes `bytes` to `key`, creating the base directory if missing. I/O failures are
    /// logged; callers that need hard failure should check logs, per the read-path
    /// best-effort contract shared with snapshot writes.
    pub async fn write(&self, key: &str, bytes: Vec<u8>) {
        let base = self.base.clone();
        let key = key.to_string();
        let result = tokio::task::spawn_blocking(move || write_blocking(&base, &key, &bytes))
            .await;
        if let Err(join_err) = result {
            warn!("blob-store write task panicked: {join_err}");
        }
    }

    /// Removes `key`. A missing file is not an error.
    pub async fn delete(&self, key: &str) {
        let path = self.base.join(key);
        let result = tokio::task::spawn_blocking(move || delete_blocking(&path)).await;
        if let Err(join_err) = result {
            warn!("blob-store delete task panicked: {join_err}");
        }
    }
}

fn read_blocking(path: &Path) -> Option<Vec<u8>> {
    if !path.exists() {
        return None;
    }
    match File::open(path) {
        Ok(mut file) => {
            if let Err(e) = file.lock_exclusive() {
                warn!("blob-store: failed to lock {}: {e}", path.display());
                return None;
            }
            let mut buf = Vec::new();
            let result = file.read_to_end(&mut buf);
            let _ = file.unlock();
            match result {
                Ok(_) => Some(buf),
                Err(e) => {
                    warn!("blob-store: failed to read {}: {e}", path.display());
                    None
                }
            }
        }
        Err(e) => {
            warn!("blob-store: failed to open {}: {e}", path.display());
            None
        }
    }
}

fn write_blocking(base: &Path, key: &str, bytes: &[u8]) {
    if !base.is_dir()
        && let Err(e) = fs::create_dir_all(base)
    {
        warn!("blob-store: failed to create base dir {}: {e}", base.display());
        return;
    }

    let path = base.join(key);
    match OpenOptions::new().write(true).create(true).truncate(true).open(&path) {
        Ok(mut file) => {
            if let Err(e) = file.lock_exclusive() {
                warn!("blob-store: failed to lock {}: {e}", path.display());
                return;
            }
            if let Err(e) = file.write_all(bytes) {
                warn!("blob-store: failed to write {}: {e}", path.display());
            }
            let _ = file.unlock();
            debug!("blob-store: wrote {} bytes to {}", bytes.len(), path.display());
        }
        Err(e) => warn!("blob-store: failed to open {} for write: {e}", path.display()),
    }
}

fn delete_blocking(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("blob-store: failed to delete {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        assert!(store.read("d+g+").await.is_none());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("nested"));
        store.write("d+g+", b"hello".to_vec()).await;
        assert_eq!(store.read("d+g+").await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn delete_missing_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        store.delete("does-not-exist").await;
    }

    #[tokio::test]
    async fn write_then_delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        store.write("k", b"v".to_vec()).await;
        store.delete("k").await;
        assert!(store.read("k").await.is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_bytes_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        store.write("k", b"aaaaaaaaaa".to_vec()).await;
        store.write("k", b"short".to_vec()).await;
        assert_eq!(store.read("k").await, Some(b"short".to_vec()));
    }
}
