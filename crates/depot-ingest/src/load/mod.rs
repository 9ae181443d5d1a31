//! Load bookkeeping model types
//!
//! A bulk load is registered as one row per logical file in the
//! bookkeeping store. Rows move monotonically through
//! `NotTried → Running → {Succeeded, Failed}`; the single backward edge,
//! `Running → NotTried`, is reserved for the driver's orphan recovery.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryLoadStore;
pub use postgres::PgLoadStore;
pub use store::LoadStore;

/// Result type alias for load bookkeeping operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Errors raised by the bookkeeping store.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Another flight holds the load tag; concurrent bulk loads under one
    /// tag are not allowed.
    #[error("Load {load_tag} is locked by flight {locking_flight_id}")]
    LoadLocked {
        load_tag: String,
        locking_flight_id: String,
    },

    #[error("Duplicate target path in load request: {0}")]
    DuplicateTargetPath(String),

    #[error("Load bookkeeping is corrupt: {0}")]
    CorruptState(String),

    #[error("Load store operation failed: {0}")]
    Store(String),
}

impl From<sqlx::Error> for LoadError {
    fn from(e: sqlx::Error) -> Self {
        LoadError::Store(e.to_string())
    }
}

/// Lifecycle state of one file within a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFileState {
    NotTried,
    Running,
    Succeeded,
    Failed,
}

impl LoadFileState {
    pub fn as_str(&self) -> &str {
        match self {
            LoadFileState::NotTried => "not_tried",
            LoadFileState::Running => "running",
            LoadFileState::Succeeded => "succeeded",
            LoadFileState::Failed => "failed",
        }
    }
}

impl From<String> for LoadFileState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => LoadFileState::Running,
            "succeeded" => LoadFileState::Succeeded,
            "failed" => LoadFileState::Failed,
            _ => LoadFileState::NotTried,
        }
    }
}

/// One file a caller asked a bulk load to ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFileSpec {
    pub source_path: String,
    pub target_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One bookkeeping row: a logical file and where it stands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFile {
    pub load_id: Uuid,
    pub source_path: String,
    pub target_path: String,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub state: LoadFileState,
    /// Flight driving this file, recorded before the flight is submitted.
    pub flight_id: Option<String>,
    pub file_id: Option<Uuid>,
    pub error: Option<String>,
}

/// A locked load row: one logical bulk load keyed by its tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub load_id: Uuid,
    pub load_tag: String,
    pub locking_flight_id: Option<String>,
}

/// Point-in-time scheduling snapshot, recomputed every driver iteration.
#[derive(Debug, Clone, Default)]
pub struct LoadCandidates {
    pub failed_loads: i64,
    pub running_loads: Vec<LoadFile>,
    pub candidate_files: Vec<LoadFile>,
}

/// Per-state row counts for a finished load.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoadStateCounts {
    pub total_files: i64,
    pub succeeded_files: i64,
    pub failed_files: i64,
    pub not_tried_files: i64,
}

/// The bulk-load summary returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkLoadResult {
    pub load_tag: String,
    /// Flight id of the bulk job that produced this result.
    pub job_id: String,
    pub total_files: i64,
    pub succeeded_files: i64,
    pub failed_files: i64,
    pub not_tried_files: i64,
}

impl BulkLoadResult {
    pub fn new(load_tag: impl Into<String>, job_id: impl Into<String>, counts: LoadStateCounts) -> Self {
        Self {
            load_tag: load_tag.into(),
            job_id: job_id.into(),
            total_files: counts.total_files,
            succeeded_files: counts.succeeded_files,
            failed_files: counts.failed_files,
            not_tried_files: counts.not_tried_files,
        }
    }
}

/// Per-file detail for callers that ask for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFileResult {
    pub source_path: String,
    pub target_path: String,
    pub state: LoadFileState,
    pub file_id: Option<Uuid>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_string_roundtrip() {
        for state in [
            LoadFileState::NotTried,
            LoadFileState::Running,
            LoadFileState::Succeeded,
            LoadFileState::Failed,
        ] {
            assert_eq!(LoadFileState::from(state.as_str().to_string()), state);
        }
    }

    #[test]
    fn test_spec_parses_from_control_line() {
        let line = r#"{"source_path": "s3://ext/a.bin", "target_path": "/a.bin"}"#;
        let spec: LoadFileSpec = serde_json::from_str(line).unwrap();
        assert_eq!(spec.source_path, "s3://ext/a.bin");
        assert!(spec.mime_type.is_none());
    }
}
