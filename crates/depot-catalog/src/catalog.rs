//! Catalog coordinator
//!
//! Operations on a file touch both record kinds, so this layer sits above
//! the document store and keeps them coherent: directory entries claim
//! paths (and carry the load-tag conflict rules), file metadata makes a
//! file visible, and lookups refuse to show a file that has one record
//! but not the other.
//!
//! Idempotency protocol: a resubmission under the *same* load tag
//! coalesces with whatever a previous attempt wrote, reporting id
//! reconciliations through the conflict map; a submission under a
//! *different* load tag targeting an occupied path is a hard conflict and
//! fails the whole batch.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entry::{DirectoryEntry, FileMetadata, FsDir, FsFile, FsItem};
use crate::error::{CatalogError, Result};
use crate::paths;
use crate::store::{MetadataStore, UpsertOutcome};

/// Caller-proposed file ids reconciled to pre-existing ids during an
/// idempotent upsert.
pub type ConflictMap = HashMap<Uuid, Uuid>;

/// Enumerate a directory's entire subtree during lookups.
pub const ENUMERATE_ALL: i32 = -1;

/// The hierarchical namespace over a document store.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn MetadataStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    // -- bulk operations --

    /// Make sure every directory in `dir_paths` exists. Pre-existing
    /// directories are left untouched, whatever load wrote them.
    pub async fn upsert_directory_paths(
        &self,
        collection_id: Uuid,
        dir_paths: &[String],
    ) -> Result<()> {
        let entries: Vec<DirectoryEntry> = dir_paths
            .iter()
            .map(|p| DirectoryEntry::new_directory(collection_id, p))
            .collect();
        for batch in entries.chunks(self.store.max_batch_size()) {
            self.store
                .insert_entries_if_absent(collection_id, batch)
                .await?;
        }
        Ok(())
    }

    /// Upsert leaf file-ref entries with load-tag conflict handling.
    ///
    /// Ancestor directories are derived from the targets and created
    /// first, so every successfully upserted leaf has its full chain
    /// present. Returns the conflict map: proposed id → existing id for
    /// every slot coalesced with an earlier attempt under the same tag.
    ///
    /// # Errors
    ///
    /// [`CatalogError::FileAlreadyExists`] when any target is claimed
    /// under a different load tag; nothing else from the batch is rolled
    /// back (re-running under the proper tag remains idempotent).
    pub async fn upsert_directory_entries(
        &self,
        collection_id: Uuid,
        entries: &[DirectoryEntry],
    ) -> Result<ConflictMap> {
        let mut dir_paths: Vec<String> = entries
            .iter()
            .flat_map(|e| paths::extract_directory_paths(&e.full_path()))
            .collect();
        dir_paths.sort();
        dir_paths.dedup();

        debug!(
            collection_id = %collection_id,
            directories = dir_paths.len(),
            leaves = entries.len(),
            "Upserting directory entries"
        );
        self.upsert_directory_paths(collection_id, &dir_paths).await?;

        let mut conflicts = ConflictMap::new();
        for batch in entries.chunks(self.store.max_batch_size()) {
            let outcomes = self
                .store
                .insert_entries_if_absent(collection_id, batch)
                .await?;
            for (proposed, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    UpsertOutcome::Created => {},
                    UpsertOutcome::Existing(existing) => {
                        if existing.load_tag != proposed.load_tag {
                            return Err(CatalogError::FileAlreadyExists(proposed.full_path()));
                        }
                        if existing.file_id != proposed.file_id {
                            conflicts.insert(proposed.file_id, existing.file_id);
                        }
                    },
                }
            }
        }

        if !conflicts.is_empty() {
            info!(
                collection_id = %collection_id,
                conflicts = conflicts.len(),
                "Coalesced entries from an earlier attempt"
            );
        }
        Ok(conflicts)
    }

    /// Write file metadata records, chunked to the store's batch ceiling.
    pub async fn upsert_file_metadata(
        &self,
        collection_id: Uuid,
        files: &[FileMetadata],
    ) -> Result<()> {
        for batch in files.chunks(self.store.max_batch_size()) {
            self.store.put_files(collection_id, batch).await?;
        }
        Ok(())
    }

    // -- single-entry operations (per-file flight path) --

    /// Claim a target path for a file, creating missing ancestors on the
    /// way. Returns the file id that ends up owning the path: the caller's
    /// id when created, or the pre-existing id when coalescing a retry
    /// under the same load tag.
    ///
    /// # Errors
    ///
    /// [`CatalogError::FileAlreadyExists`] when the path is claimed under
    /// a different load tag.
    pub async fn create_directory_entry(
        &self,
        collection_id: Uuid,
        entry: DirectoryEntry,
    ) -> Result<Uuid> {
        let dir_paths = paths::extract_directory_paths(&entry.full_path());
        self.upsert_directory_paths(collection_id, &dir_paths).await?;

        let outcomes = self
            .store
            .insert_entries_if_absent(collection_id, std::slice::from_ref(&entry))
            .await?;
        match outcomes.into_iter().next() {
            Some(UpsertOutcome::Created) | None => Ok(entry.file_id),
            Some(UpsertOutcome::Existing(existing)) => {
                if existing.load_tag == entry.load_tag {
                    Ok(existing.file_id)
                } else {
                    Err(CatalogError::FileAlreadyExists(entry.full_path()))
                }
            },
        }
    }

    /// Delete the entry holding `file_id`, then prune ancestor
    /// directories that became empty, walking up until a non-empty one is
    /// found. Returns whether an entry existed.
    pub async fn delete_directory_entry(
        &self,
        collection_id: Uuid,
        file_id: Uuid,
    ) -> Result<bool> {
        let Some(entry) = self.store.get_entry_by_file_id(collection_id, file_id).await? else {
            return Ok(false);
        };
        self.store
            .delete_entry(collection_id, &entry.full_path())
            .await?;

        // Empty directories are not allowed to linger; remove the chain
        // bottom-up until a still-populated directory stops the walk.
        let mut dir_paths = paths::extract_directory_paths(&entry.full_path());
        while let Some(dir) = dir_paths.pop() {
            if !self.store.list_entries_in_dir(collection_id, &dir).await?.is_empty() {
                break;
            }
            debug!(collection_id = %collection_id, path = %dir, "Pruning empty directory");
            self.store.delete_entry(collection_id, &dir).await?;
        }
        Ok(true)
    }

    /// Delete one file metadata record. Returns whether one existed.
    pub async fn delete_file_metadata(
        &self,
        collection_id: Uuid,
        file_id: Uuid,
    ) -> Result<bool> {
        self.store.delete_file(collection_id, file_id).await
    }

    // -- lookups --

    /// Look up an item by full path.
    ///
    /// `enumerate_depth` controls directory expansion: 0 returns the bare
    /// directory, 1 its children, and [`ENUMERATE_ALL`] the whole subtree.
    /// A file whose metadata has not been committed yet is reported as
    /// absent.
    pub async fn lookup_path(
        &self,
        collection_id: Uuid,
        full_path: &str,
        enumerate_depth: i32,
    ) -> Result<Option<FsItem>> {
        let entry = self.store.get_entry_by_path(collection_id, full_path).await?;
        self.assemble(collection_id, entry, enumerate_depth).await
    }

    /// Look up an item by file id. Same visibility rules as
    /// [`lookup_path`](Self::lookup_path).
    pub async fn lookup_file_id(
        &self,
        collection_id: Uuid,
        file_id: Uuid,
        enumerate_depth: i32,
    ) -> Result<Option<FsItem>> {
        let entry = self.store.get_entry_by_file_id(collection_id, file_id).await?;
        self.assemble(collection_id, entry, enumerate_depth).await
    }

    async fn assemble(
        &self,
        collection_id: Uuid,
        entry: Option<DirectoryEntry>,
        enumerate_depth: i32,
    ) -> Result<Option<FsItem>> {
        let Some(entry) = entry else {
            return Ok(None);
        };
        if entry.is_file_ref {
            return self.assemble_file(collection_id, &entry).await;
        }
        Ok(Some(self.assemble_dir(collection_id, &entry, enumerate_depth).await?))
    }

    async fn assemble_file(
        &self,
        collection_id: Uuid,
        entry: &DirectoryEntry,
    ) -> Result<Option<FsItem>> {
        // A directory entry without file metadata is an ingest still in
        // flight (or one that failed); it does not exist for readers.
        let Some(file) = self.store.get_file(collection_id, entry.file_id).await? else {
            return Ok(None);
        };
        Ok(Some(FsItem::File(FsFile {
            file_id: entry.file_id,
            collection_id,
            path: entry.full_path(),
            size: file.size,
            checksum_crc32c: file.checksum_crc32c,
            checksum_md5: file.checksum_md5,
            mime_type: file.mime_type,
            description: file.description,
            cloud_path: file.cloud_path,
            created_date: file.created_date,
        })))
    }

    /// Recursively assemble a directory view down to `depth` levels.
    fn assemble_dir<'a>(
        &'a self,
        collection_id: Uuid,
        entry: &'a DirectoryEntry,
        depth: i32,
    ) -> BoxFuture<'a, Result<FsItem>> {
        Box::pin(async move {
            let full_path = entry.full_path();
            let mut contents = Vec::new();
            if depth != 0 {
                for child in self.store.list_entries_in_dir(collection_id, &full_path).await? {
                    if child.is_file_ref {
                        if let Some(item) = self.assemble_file(collection_id, &child).await? {
                            contents.push(item);
                        }
                    } else {
                        let next_depth = if depth == ENUMERATE_ALL { depth } else { depth - 1 };
                        contents.push(
                            self.assemble_dir(collection_id, &child, next_depth).await?,
                        );
                    }
                }
            }
            Ok(FsItem::Dir(FsDir {
                file_id: entry.file_id,
                collection_id,
                path: full_path,
                created_date: entry.created_date,
                contents,
            }))
        })
    }
}
