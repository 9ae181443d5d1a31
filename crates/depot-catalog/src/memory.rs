//! In-memory metadata store
//!
//! Documents are keyed by lookup path, exactly as the Postgres backend
//! keys them by encoded document name, so path-collision behavior matches
//! across backends.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entry::{DirectoryEntry, FileMetadata};
use crate::error::{CatalogError, Result};
use crate::paths;
use crate::store::{MetadataStore, UpsertOutcome, MAX_BATCH_SIZE};

#[derive(Default)]
struct Collection {
    /// Directory entries keyed by lookup path.
    entries: HashMap<String, DirectoryEntry>,
    /// File metadata keyed by file id.
    files: HashMap<Uuid, FileMetadata>,
}

/// Process-local metadata store for tests and embedding.
#[derive(Default)]
pub struct MemoryMetadataStore {
    collections: RwLock<HashMap<Uuid, Collection>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total directory entries in a collection (test observability).
    pub async fn entry_count(&self, collection_id: Uuid) -> usize {
        self.collections
            .read()
            .await
            .get(&collection_id)
            .map_or(0, |c| c.entries.len())
    }

    /// Total file metadata records in a collection (test observability).
    pub async fn file_count(&self, collection_id: Uuid) -> usize {
        self.collections
            .read()
            .await
            .get(&collection_id)
            .map_or(0, |c| c.files.len())
    }
}

fn check_batch_size(len: usize) -> Result<()> {
    if len > MAX_BATCH_SIZE {
        return Err(CatalogError::Store(format!(
            "batch of {len} exceeds maximum size {MAX_BATCH_SIZE}"
        )));
    }
    Ok(())
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_entries_if_absent(
        &self,
        collection_id: Uuid,
        entries: &[DirectoryEntry],
    ) -> Result<Vec<UpsertOutcome>> {
        check_batch_size(entries.len())?;
        let mut collections = self.collections.write().await;
        let collection = collections.entry(collection_id).or_default();

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = paths::lookup_path(&entry.full_path());
            match collection.entries.get(&key) {
                Some(existing) => outcomes.push(UpsertOutcome::Existing(existing.clone())),
                None => {
                    collection.entries.insert(key, entry.clone());
                    outcomes.push(UpsertOutcome::Created);
                },
            }
        }
        Ok(outcomes)
    }

    async fn get_entry_by_path(
        &self,
        collection_id: Uuid,
        full_path: &str,
    ) -> Result<Option<DirectoryEntry>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection_id)
            .and_then(|c| c.entries.get(&paths::lookup_path(full_path)))
            .cloned())
    }

    async fn get_entry_by_file_id(
        &self,
        collection_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<DirectoryEntry>> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&collection_id) else {
            return Ok(None);
        };
        let mut matches = collection
            .entries
            .values()
            .filter(|e| e.file_id == file_id);
        let first = matches.next().cloned();
        if matches.next().is_some() {
            return Err(CatalogError::CorruptMetadata(format!(
                "more than one entry carries file id {file_id}"
            )));
        }
        Ok(first)
    }

    async fn list_entries_in_dir(
        &self,
        collection_id: Uuid,
        dir_full_path: &str,
    ) -> Result<Vec<DirectoryEntry>> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&collection_id) else {
            return Ok(Vec::new());
        };
        let normalized = paths::normalize(dir_full_path);
        let mut found: Vec<DirectoryEntry> = collection
            .entries
            .values()
            .filter(|e| e.path == normalized)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn delete_entry(&self, collection_id: Uuid, full_path: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(&collection_id)
            .map_or(false, |c| {
                c.entries.remove(&paths::lookup_path(full_path)).is_some()
            }))
    }

    async fn put_files(&self, collection_id: Uuid, files: &[FileMetadata]) -> Result<()> {
        check_batch_size(files.len())?;
        let mut collections = self.collections.write().await;
        let collection = collections.entry(collection_id).or_default();
        for file in files {
            collection.files.insert(file.file_id, file.clone());
        }
        Ok(())
    }

    async fn get_file(&self, collection_id: Uuid, file_id: Uuid) -> Result<Option<FileMetadata>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection_id)
            .and_then(|c| c.files.get(&file_id))
            .cloned())
    }

    async fn delete_file(&self, collection_id: Uuid, file_id: Uuid) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(&collection_id)
            .map_or(false, |c| c.files.remove(&file_id).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_ref(collection: Uuid, path: &str, tag: &str) -> DirectoryEntry {
        DirectoryEntry::new_file_ref(collection, Uuid::new_v4(), path, tag)
    }

    #[tokio::test]
    async fn test_insert_if_absent_reports_existing() {
        let store = MemoryMetadataStore::new();
        let collection = Uuid::new_v4();
        let first = file_ref(collection, "/a/b.txt", "tag-1");

        let outcomes = store
            .insert_entries_if_absent(collection, std::slice::from_ref(&first))
            .await
            .unwrap();
        assert!(matches!(outcomes[0], UpsertOutcome::Created));

        let second = file_ref(collection, "/a/b.txt", "tag-2");
        let outcomes = store
            .insert_entries_if_absent(collection, &[second])
            .await
            .unwrap();
        match &outcomes[0] {
            UpsertOutcome::Existing(existing) => assert_eq!(existing.file_id, first.file_id),
            UpsertOutcome::Created => panic!("slot should have been occupied"),
        }
    }

    #[tokio::test]
    async fn test_list_entries_in_dir_sorted() {
        let store = MemoryMetadataStore::new();
        let collection = Uuid::new_v4();
        for name in ["zeta.txt", "alpha.txt"] {
            store
                .insert_entries_if_absent(
                    collection,
                    &[file_ref(collection, &format!("/dir/{name}"), "t")],
                )
                .await
                .unwrap();
        }
        let listed = store.list_entries_in_dir(collection, "/dir").await.unwrap();
        let names: Vec<_> = listed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.txt", "zeta.txt"]);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let store = MemoryMetadataStore::new();
        let collection = Uuid::new_v4();
        let batch: Vec<_> = (0..=MAX_BATCH_SIZE)
            .map(|i| file_ref(collection, &format!("/big/{i}"), "t"))
            .collect();
        assert!(store
            .insert_entries_if_absent(collection, &batch)
            .await
            .is_err());
    }
}
