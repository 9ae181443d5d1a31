//! Metadata store contract
//!
//! [`MetadataStore`] is the document-level interface beneath the catalog:
//! keyed and batched reads/writes for directory entries and file metadata
//! records. The store knows nothing about load tags or conflict policy;
//! it supplies the one primitive the upsert layer needs (batched
//! insert-if-absent with created-vs-existing outcomes) and the catalog
//! builds the semantics on top.

use async_trait::async_trait;
use uuid::Uuid;

use crate::entry::{DirectoryEntry, FileMetadata};
use crate::error::Result;

/// Largest number of documents one batched write may carry. Writes above
/// this size must be chunked by the caller.
pub const MAX_BATCH_SIZE: usize = 500;

/// Outcome of one insert-if-absent slot, parallel to the input batch.
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// The proposed entry was written.
    Created,
    /// A document already occupied the slot; it is returned unchanged.
    Existing(DirectoryEntry),
}

/// Storage contract for catalog documents.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn MetadataStore>`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Batch-size ceiling for this backend.
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    /// Insert each entry unless its (path, name) slot is taken, returning
    /// one outcome per input in order. Never overwrites.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or when the batch exceeds
    /// [`max_batch_size`](Self::max_batch_size).
    async fn insert_entries_if_absent(
        &self,
        collection_id: Uuid,
        entries: &[DirectoryEntry],
    ) -> Result<Vec<UpsertOutcome>>;

    /// Fetch the entry at a full path.
    async fn get_entry_by_path(
        &self,
        collection_id: Uuid,
        full_path: &str,
    ) -> Result<Option<DirectoryEntry>>;

    /// Fetch the entry carrying a file id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::CorruptMetadata`](crate::CatalogError) when
    /// more than one entry carries the id.
    async fn get_entry_by_file_id(
        &self,
        collection_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<DirectoryEntry>>;

    /// Entries whose directory path equals `dir_full_path`.
    async fn list_entries_in_dir(
        &self,
        collection_id: Uuid,
        dir_full_path: &str,
    ) -> Result<Vec<DirectoryEntry>>;

    /// Delete the entry at a full path. Returns whether one existed.
    async fn delete_entry(&self, collection_id: Uuid, full_path: &str) -> Result<bool>;

    /// Write file metadata records, overwriting per file id.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or when the batch exceeds
    /// [`max_batch_size`](Self::max_batch_size).
    async fn put_files(&self, collection_id: Uuid, files: &[FileMetadata]) -> Result<()>;

    /// Fetch one file metadata record.
    async fn get_file(&self, collection_id: Uuid, file_id: Uuid) -> Result<Option<FileMetadata>>;

    /// Delete one file metadata record. Returns whether one existed.
    async fn delete_file(&self, collection_id: Uuid, file_id: Uuid) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn MetadataStore`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn MetadataStore) {}
    }
}
