//! Catalog record types
//!
//! The namespace splits a file's data across two record kinds: the
//! [`DirectoryEntry`] claims a (path, name) slot in the hierarchy, and
//! [`FileMetadata`] carries the physical facts established by a
//! successful copy. A file-ref entry without its metadata record marks an
//! ingest that is in flight or failed; lookups treat it as absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::paths;

/// One node in the hierarchical namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub file_id: Uuid,
    /// True for a file reference, false for a directory.
    pub is_file_ref: bool,
    /// Directory path containing this entry (not including its name).
    pub path: String,
    pub name: String,
    pub collection_id: Uuid,
    /// Set on file refs; directories carry no load tag.
    pub load_tag: Option<String>,
    pub created_date: DateTime<Utc>,
}

impl DirectoryEntry {
    /// A directory node for the given full path. The root directory has
    /// an empty path and name.
    pub fn new_directory(collection_id: Uuid, full_path: &str) -> Self {
        let (path, name) = paths::split_path(full_path);
        Self {
            file_id: Uuid::new_v4(),
            is_file_ref: false,
            path,
            name,
            collection_id,
            load_tag: None,
            created_date: Utc::now(),
        }
    }

    /// A file reference claiming the given target path.
    pub fn new_file_ref(
        collection_id: Uuid,
        file_id: Uuid,
        target_path: &str,
        load_tag: impl Into<String>,
    ) -> Self {
        let (path, name) = paths::split_path(target_path);
        Self {
            file_id,
            is_file_ref: true,
            path,
            name,
            collection_id,
            load_tag: Some(load_tag.into()),
            created_date: Utc::now(),
        }
    }

    pub fn full_path(&self) -> String {
        paths::full_path(&self.path, &self.name)
    }
}

/// Physical facts about an ingested file, written only after the
/// copy/link succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_id: Uuid,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    /// Identifier of the bucket (or storage account) resource holding the
    /// object.
    pub bucket_resource_id: String,
    /// Where the object physically lives (e.g. `s3://bucket/key`).
    pub cloud_path: String,
    pub checksum_crc32c: Option<String>,
    pub checksum_md5: Option<String>,
    pub size: i64,
    pub load_tag: String,
    pub created_date: DateTime<Utc>,
}

/// A complete file view assembled from both record kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsFile {
    pub file_id: Uuid,
    pub collection_id: Uuid,
    /// Full path of the file in the namespace.
    pub path: String,
    pub size: i64,
    pub checksum_crc32c: Option<String>,
    pub checksum_md5: Option<String>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub cloud_path: String,
    pub created_date: DateTime<Utc>,
}

/// A directory view, optionally carrying enumerated contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsDir {
    pub file_id: Uuid,
    pub collection_id: Uuid,
    /// Full path of the directory in the namespace.
    pub path: String,
    pub created_date: DateTime<Utc>,
    pub contents: Vec<FsItem>,
}

/// Result of a namespace lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FsItem {
    File(FsFile),
    Dir(FsDir),
}

impl FsItem {
    pub fn file_id(&self) -> Uuid {
        match self {
            FsItem::File(f) => f.file_id,
            FsItem::Dir(d) => d.file_id,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FsItem::File(f) => &f.path,
            FsItem::Dir(d) => &d.path,
        }
    }

    pub fn as_file(&self) -> Option<&FsFile> {
        match self {
            FsItem::File(f) => Some(f),
            FsItem::Dir(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_ref_splits_target_path() {
        let collection = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        let entry = DirectoryEntry::new_file_ref(collection, file_id, "/a/b/c.txt", "tag-1");
        assert!(entry.is_file_ref);
        assert_eq!(entry.path, "/a/b");
        assert_eq!(entry.name, "c.txt");
        assert_eq!(entry.full_path(), "/a/b/c.txt");
        assert_eq!(entry.load_tag.as_deref(), Some("tag-1"));
    }

    #[test]
    fn test_root_directory_has_no_path_or_name() {
        let entry = DirectoryEntry::new_directory(Uuid::new_v4(), "/");
        assert!(entry.path.is_empty());
        assert!(entry.name.is_empty());
        assert!(entry.load_tag.is_none());
        assert_eq!(entry.full_path(), "/");
    }
}
