//! Catalog errors

use thiserror::Error;

/// Result type alias for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors raised by the namespace and its document store.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The target path is already claimed under a different load tag.
    /// This is a hard conflict; the whole submission it belongs to fails.
    #[error("Path already exists: {0}")]
    FileAlreadyExists(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The store returned something the invariants forbid (duplicate file
    /// ids, a file entry where a directory was expected, and so on).
    #[error("Catalog metadata is corrupt: {0}")]
    CorruptMetadata(String),

    #[error("Metadata store operation failed: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for CatalogError {
    fn from(e: sqlx::Error) -> Self {
        CatalogError::Store(e.to_string())
    }
}
