//! In-memory object store
//!
//! Backs tests and single-process embeddings. Beyond the plain store
//! behavior it supports two test affordances: per-source fault injection
//! (transient or permanent, for a fixed number of attempts) and a copy
//! gate that holds copies until released, letting tests observe a bulk
//! load mid-flight.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use depot_common::checksum;

use super::{normalize_target, predictable_file_id, FileInfo, ObjectStore, Result, StorageError};

const MEMORY_BUCKET: &str = "memory";

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    /// How many live links reference this object (linked sources only).
    link_count: u32,
}

/// Fault injected for a source path.
#[derive(Debug, Clone, Copy)]
pub enum InjectedFault {
    /// Fail with a transient error for the next `n` attempts.
    Transient(u32),
    /// Fail permanently on every attempt.
    Permanent,
}

#[derive(Default)]
struct Inner {
    /// The external world: source objects by source path.
    sources: HashMap<String, Vec<u8>>,
    /// Managed storage: objects by cloud path.
    stored: HashMap<String, StoredObject>,
    faults: HashMap<String, InjectedFault>,
}

/// Process-local object store.
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
    gate_tx: watch::Sender<bool>,
    gate_rx: watch::Receiver<bool>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        let (gate_tx, gate_rx) = watch::channel(true);
        Self {
            inner: Mutex::new(Inner::default()),
            gate_tx,
            gate_rx,
        }
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a source object the store can copy or link from.
    pub async fn put_source(&self, source_path: &str, data: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .await
            .sources
            .insert(source_path.to_string(), data.into());
    }

    /// Inject a fault for a source path.
    pub async fn inject_fault(&self, source_path: &str, fault: InjectedFault) {
        self.inner
            .lock()
            .await
            .faults
            .insert(source_path.to_string(), fault);
    }

    /// Clear any injected fault for a source path.
    pub async fn clear_fault(&self, source_path: &str) {
        self.inner.lock().await.faults.remove(source_path);
    }

    /// Hold all subsequent copies until [`resume_copies`](Self::resume_copies).
    pub fn pause_copies(&self) {
        let _ = self.gate_tx.send(false);
    }

    /// Release copies held by [`pause_copies`](Self::pause_copies).
    pub fn resume_copies(&self) {
        let _ = self.gate_tx.send(true);
    }

    /// Number of managed objects (test observability).
    pub async fn stored_count(&self) -> usize {
        self.inner.lock().await.stored.len()
    }

    /// Current link count of an object, if present.
    pub async fn link_count(&self, cloud_path: &str) -> Option<u32> {
        self.inner
            .lock()
            .await
            .stored
            .get(cloud_path)
            .map(|o| o.link_count)
    }

    async fn wait_for_gate(&self) {
        let mut rx = self.gate_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Take one failure charge for a source, if any is armed.
    async fn check_fault(&self, source_path: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.faults.get_mut(source_path) {
            None => Ok(()),
            Some(InjectedFault::Permanent) => Err(StorageError::Permanent(format!(
                "injected failure for {source_path}"
            ))),
            Some(InjectedFault::Transient(remaining)) => {
                if *remaining == 0 {
                    inner.faults.remove(source_path);
                    return Ok(());
                }
                *remaining -= 1;
                Err(StorageError::Transient(format!(
                    "injected transient failure for {source_path}"
                )))
            },
        }
    }

    fn file_info(cloud_path: &str, file_id: Uuid, data: &[u8]) -> FileInfo {
        FileInfo {
            file_id,
            bucket_resource_id: MEMORY_BUCKET.to_string(),
            cloud_path: cloud_path.to_string(),
            size: data.len() as i64,
            checksum_crc32c: Some(checksum::compute_crc32(data)),
            checksum_md5: Some(checksum::compute_md5(data)),
            created_date: Utc::now(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn copy(
        &self,
        source_path: &str,
        target_path: &str,
        file_id: Option<Uuid>,
    ) -> Result<FileInfo> {
        self.wait_for_gate().await;
        self.check_fault(source_path).await?;

        let mut inner = self.inner.lock().await;
        let data = inner
            .sources
            .get(source_path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source_path.to_string()))?;

        let md5 = checksum::compute_md5(&data);
        let file_id = file_id.unwrap_or_else(|| predictable_file_id(&md5, target_path));
        let cloud_path = format!(
            "mem://{MEMORY_BUCKET}/{}{}",
            file_id.as_simple(),
            normalize_target(target_path)
        );
        // A retried copy lands on the same cloud path and overwrites.
        inner.stored.insert(
            cloud_path.clone(),
            StoredObject {
                data: data.clone(),
                link_count: 0,
            },
        );
        Ok(Self::file_info(&cloud_path, file_id, &data))
    }

    async fn link(&self, source_path: &str, file_id: Option<Uuid>) -> Result<FileInfo> {
        self.check_fault(source_path).await?;

        let mut inner = self.inner.lock().await;
        let data = inner
            .sources
            .get(source_path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source_path.to_string()))?;

        let md5 = checksum::compute_md5(&data);
        let file_id = file_id.unwrap_or_else(|| predictable_file_id(&md5, source_path));
        let cloud_path = format!("mem://{MEMORY_BUCKET}/links{}", normalize_target(source_path));
        inner
            .stored
            .entry(cloud_path.clone())
            .or_insert_with(|| StoredObject {
                data: data.clone(),
                link_count: 0,
            })
            .link_count += 1;
        Ok(Self::file_info(&cloud_path, file_id, &data))
    }

    async fn read(&self, source_path: &str) -> Result<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner
            .sources
            .get(source_path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source_path.to_string()))
    }

    async fn delete(&self, cloud_path: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.stored.remove(cloud_path).is_some())
    }

    async fn unlink(&self, cloud_path: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(object) = inner.stored.get_mut(cloud_path) {
            object.link_count = object.link_count.saturating_sub(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_is_idempotent_on_cloud_path() {
        let store = MemoryObjectStore::new();
        store.put_source("src://a", b"hello".to_vec()).await;

        let id = Uuid::new_v4();
        let first = store.copy("src://a", "/t/a.txt", Some(id)).await.unwrap();
        let second = store.copy("src://a", "/t/a.txt", Some(id)).await.unwrap();
        assert_eq!(first.cloud_path, second.cloud_path);
        assert_eq!(store.stored_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.copy("src://missing", "/t", None).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_transient_fault_burns_down() {
        let store = MemoryObjectStore::new();
        store.put_source("src://a", b"data".to_vec()).await;
        store
            .inject_fault("src://a", InjectedFault::Transient(2))
            .await;

        assert!(store.copy("src://a", "/t", None).await.unwrap_err().is_transient());
        assert!(store.copy("src://a", "/t", None).await.unwrap_err().is_transient());
        assert!(store.copy("src://a", "/t", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_unlink_decrements_but_keeps_object() {
        let store = MemoryObjectStore::new();
        store.put_source("src://shared", b"blob".to_vec()).await;

        let first = store.link("src://shared", None).await.unwrap();
        let second = store.link("src://shared", None).await.unwrap();
        assert_eq!(first.cloud_path, second.cloud_path);
        assert_eq!(store.link_count(&first.cloud_path).await, Some(2));

        store.unlink(&first.cloud_path).await.unwrap();
        assert_eq!(store.link_count(&first.cloud_path).await, Some(1));
        // The shared object survives a single unlink.
        assert_eq!(store.stored_count().await, 1);
    }
}
