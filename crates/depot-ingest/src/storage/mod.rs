//! Object storage interface
//!
//! [`ObjectStore`] abstracts the managed storage files are copied or
//! linked into. Errors carry an explicit transient/permanent distinction;
//! the copier and the copy step match on it exactly once to decide retry
//! versus fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod config;
pub mod memory;
pub mod s3;

pub use config::StorageConfig;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// Result type alias for object storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Object storage failures, split by retryability.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// The source object does not exist; retrying cannot help.
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Infrastructure hiccup (timeout, rate limit, 5xx); safe to retry.
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Anything else; retrying will not change the outcome.
    #[error("Storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Physical facts produced by a successful copy or link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: Uuid,
    /// Identifier of the bucket resource now holding the object.
    pub bucket_resource_id: String,
    /// Where the object lives (e.g. `s3://bucket/key`).
    pub cloud_path: String,
    pub size: i64,
    pub checksum_crc32c: Option<String>,
    pub checksum_md5: Option<String>,
    pub created_date: DateTime<Utc>,
}

/// Managed storage for ingested objects.
///
/// When `file_id` is `None` the store derives one from the operation
/// itself (content-addressed); collections configured for predictable ids
/// rely on that derivation being stable across retries.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy an external object into managed storage.
    async fn copy(
        &self,
        source_path: &str,
        target_path: &str,
        file_id: Option<Uuid>,
    ) -> Result<FileInfo>;

    /// Register an already-resident object without moving bytes (the
    /// cheap path for self-hosted sources). Each successful link bumps
    /// the object's usage count.
    async fn link(&self, source_path: &str, file_id: Option<Uuid>) -> Result<FileInfo>;

    /// Read a small control object in full.
    async fn read(&self, source_path: &str) -> Result<Vec<u8>>;

    /// Remove a copied object. Returns whether one existed.
    async fn delete(&self, cloud_path: &str) -> Result<bool>;

    /// Drop one usage of a linked object. The object itself stays put
    /// until its usage count reaches zero, so concurrent creators never
    /// race-delete a shared link.
    async fn unlink(&self, cloud_path: &str) -> Result<()>;
}

/// Derive a stable, content-addressed file id from the object's checksum
/// and destination. Retrying the same copy yields the same id.
pub(crate) fn predictable_file_id(checksum_md5: &str, target_path: &str) -> Uuid {
    let digest = md5::compute(format!("{checksum_md5}:{target_path}").as_bytes());
    Uuid::from_bytes(digest.0)
}

/// Tidy a target path for use in an object key: leading slash, no
/// trailing slash.
pub(crate) fn normalize_target(target_path: &str) -> String {
    let mut path = target_path.trim_end_matches('/').to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn ObjectStore`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn ObjectStore) {}
    }

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Transient("timeout".into()).is_transient());
        assert!(!StorageError::Permanent("denied".into()).is_transient());
        assert!(!StorageError::NotFound("gone".into()).is_transient());
    }

    #[test]
    fn test_predictable_id_is_stable() {
        let a = predictable_file_id("abc123", "/a/b.txt");
        let b = predictable_file_id("abc123", "/a/b.txt");
        assert_eq!(a, b);
        assert_ne!(a, predictable_file_id("abc123", "/a/c.txt"));
    }
}
