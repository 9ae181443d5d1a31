//! Load bookkeeping store contract

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    BulkFileResult, Load, LoadCandidates, LoadFile, LoadFileSpec, LoadStateCounts, Result,
};

/// Storage contract for bulk-load bookkeeping.
///
/// Row updates are monotonic (`NotTried → Running → {Succeeded, Failed}`)
/// and keyed by `(load_id, target_path)`, which keeps them safe under
/// concurrent driver iterations. Implementations must be `Send + Sync`
/// for use behind `Arc<dyn LoadStore>`.
#[async_trait]
pub trait LoadStore: Send + Sync {
    // -- load-tag locking --

    /// Create-or-lock the load for a tag on behalf of a flight.
    /// Re-locking by the same flight succeeds (resumed flights re-run
    /// their lock step).
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::LoadLocked`](super::LoadError) when a
    /// different flight holds the tag.
    async fn lock_load(&self, load_tag: &str, flight_id: &str) -> Result<Load>;

    /// Unlock a load. Idempotent: a missing or already-unlocked load is
    /// not an error, but a lock held by a different flight is.
    async fn unlock_load(&self, load_tag: &str, flight_id: &str) -> Result<()>;

    // -- load file rows --

    /// Register a batch of files as `NotTried`. Rows that already exist
    /// for `(load_id, target_path)` are left untouched so a resumed
    /// flight can repopulate safely.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::DuplicateTargetPath`](super::LoadError) when
    /// the batch itself names one target twice.
    async fn populate_files(&self, load_id: Uuid, files: &[LoadFileSpec]) -> Result<()>;

    /// Remove every row of a load.
    async fn clean_files(&self, load_id: Uuid) -> Result<()>;

    /// Scheduling snapshot: failed count, all running rows, and up to
    /// `candidate_limit` not-tried rows.
    async fn find_candidates(&self, load_id: Uuid, candidate_limit: usize)
        -> Result<LoadCandidates>;

    /// All rows currently marked running.
    async fn find_running(&self, load_id: Uuid) -> Result<Vec<LoadFile>>;

    /// Up to `limit` failed rows, for error reporting.
    async fn find_failed(&self, load_id: Uuid, limit: usize) -> Result<Vec<LoadFile>>;

    /// Orphan repair: revert a row to `NotTried`, clearing its flight id.
    async fn set_not_tried(&self, load_id: Uuid, target_path: &str) -> Result<()>;

    /// Mark a row running under a flight id. Persisted *before* the
    /// flight is submitted; the crash window this opens is repaired by
    /// orphan recovery.
    async fn set_running(&self, load_id: Uuid, target_path: &str, flight_id: &str) -> Result<()>;

    /// Record a terminal success with the file id the flight produced.
    async fn set_succeeded(&self, load_id: Uuid, target_path: &str, file_id: Uuid) -> Result<()>;

    /// Record a terminal failure with its cause.
    async fn set_failed(&self, load_id: Uuid, target_path: &str, error: &str) -> Result<()>;

    // -- result aggregation --

    /// Count rows by state for the final summary.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::CorruptState`](super::LoadError) when any row
    /// is still running; the driver must have drained the load first.
    async fn state_counts(&self, load_id: Uuid) -> Result<LoadStateCounts>;

    /// Per-file results for callers that want detail.
    async fn file_results(&self, load_id: Uuid) -> Result<Vec<BulkFileResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn LoadStore`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn LoadStore) {}
    }
}
