//! Error types shared across the Depot workspace

use thiserror::Error;

/// Result type alias for Depot operations
pub type Result<T> = std::result::Result<T, DepotError>;

/// Errors that are meaningful in more than one crate of the workspace.
///
/// Subsystems define their own narrower enums (`FlightError`,
/// `CatalogError`, `StorageError`, `LoadError`) and convert into this type
/// at the boundaries where a single error channel is needed.
#[derive(Error, Debug)]
pub enum DepotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Metadata is corrupt: {0}")]
    CorruptMetadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
