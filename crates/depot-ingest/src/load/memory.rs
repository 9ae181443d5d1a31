//! In-memory load bookkeeping store
//!
//! Rows keep insertion order so candidate selection is deterministic,
//! which the scheduling tests rely on.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::LoadStore;
use super::{
    BulkFileResult, Load, LoadCandidates, LoadError, LoadFile, LoadFileSpec, LoadFileState,
    LoadStateCounts, Result,
};

#[derive(Default)]
struct Inner {
    /// Loads by tag.
    loads: HashMap<String, Load>,
    /// Rows per load, in insertion order.
    files: HashMap<Uuid, Vec<LoadFile>>,
}

/// Process-local bookkeeping store for tests and embedding.
#[derive(Default)]
pub struct MemoryLoadStore {
    inner: Mutex<Inner>,
}

impl MemoryLoadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load id registered for a tag, if any (test observability).
    pub async fn load_id_for_tag(&self, load_tag: &str) -> Option<Uuid> {
        let inner = self.inner.lock().await;
        inner.loads.get(load_tag).map(|l| l.load_id)
    }

    /// Fetch one row (test observability).
    pub async fn get_file(&self, load_id: Uuid, target_path: &str) -> Option<LoadFile> {
        let inner = self.inner.lock().await;
        inner
            .files
            .get(&load_id)
            .and_then(|rows| rows.iter().find(|f| f.target_path == target_path))
            .cloned()
    }

    async fn update_file(
        &self,
        load_id: Uuid,
        target_path: &str,
        apply: impl FnOnce(&mut LoadFile),
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .files
            .get_mut(&load_id)
            .and_then(|rows| rows.iter_mut().find(|f| f.target_path == target_path))
            .ok_or_else(|| {
                LoadError::CorruptState(format!("no row for {load_id}:{target_path}"))
            })?;
        apply(row);
        Ok(())
    }
}

#[async_trait]
impl LoadStore for MemoryLoadStore {
    async fn lock_load(&self, load_tag: &str, flight_id: &str) -> Result<Load> {
        let mut inner = self.inner.lock().await;
        let load = inner
            .loads
            .entry(load_tag.to_string())
            .or_insert_with(|| Load {
                load_id: Uuid::new_v4(),
                load_tag: load_tag.to_string(),
                locking_flight_id: None,
            });

        match &load.locking_flight_id {
            Some(holder) if holder != flight_id => Err(LoadError::LoadLocked {
                load_tag: load_tag.to_string(),
                locking_flight_id: holder.clone(),
            }),
            _ => {
                load.locking_flight_id = Some(flight_id.to_string());
                Ok(load.clone())
            },
        }
    }

    async fn unlock_load(&self, load_tag: &str, flight_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(load) = inner.loads.get_mut(load_tag) else {
            return Ok(());
        };
        match &load.locking_flight_id {
            None => Ok(()),
            Some(holder) if holder == flight_id => {
                load.locking_flight_id = None;
                Ok(())
            },
            Some(holder) => Err(LoadError::LoadLocked {
                load_tag: load_tag.to_string(),
                locking_flight_id: holder.clone(),
            }),
        }
    }

    async fn populate_files(&self, load_id: Uuid, files: &[LoadFileSpec]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for spec in files {
            if !seen.insert(spec.target_path.as_str()) {
                return Err(LoadError::DuplicateTargetPath(spec.target_path.clone()));
            }
        }

        let mut inner = self.inner.lock().await;
        let rows = inner.files.entry(load_id).or_default();
        for spec in files {
            if rows.iter().any(|f| f.target_path == spec.target_path) {
                continue;
            }
            rows.push(LoadFile {
                load_id,
                source_path: spec.source_path.clone(),
                target_path: spec.target_path.clone(),
                mime_type: spec.mime_type.clone(),
                description: spec.description.clone(),
                state: LoadFileState::NotTried,
                flight_id: None,
                file_id: None,
                error: None,
            });
        }
        Ok(())
    }

    async fn clean_files(&self, load_id: Uuid) -> Result<()> {
        self.inner.lock().await.files.remove(&load_id);
        Ok(())
    }

    async fn find_candidates(
        &self,
        load_id: Uuid,
        candidate_limit: usize,
    ) -> Result<LoadCandidates> {
        let inner = self.inner.lock().await;
        let rows = inner.files.get(&load_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(LoadCandidates {
            failed_loads: rows
                .iter()
                .filter(|f| f.state == LoadFileState::Failed)
                .count() as i64,
            running_loads: rows
                .iter()
                .filter(|f| f.state == LoadFileState::Running)
                .cloned()
                .collect(),
            candidate_files: rows
                .iter()
                .filter(|f| f.state == LoadFileState::NotTried)
                .take(candidate_limit)
                .cloned()
                .collect(),
        })
    }

    async fn find_running(&self, load_id: Uuid) -> Result<Vec<LoadFile>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .files
            .get(&load_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter(|f| f.state == LoadFileState::Running)
            .cloned()
            .collect())
    }

    async fn find_failed(&self, load_id: Uuid, limit: usize) -> Result<Vec<LoadFile>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .files
            .get(&load_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter(|f| f.state == LoadFileState::Failed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_not_tried(&self, load_id: Uuid, target_path: &str) -> Result<()> {
        self.update_file(load_id, target_path, |row| {
            row.state = LoadFileState::NotTried;
            row.flight_id = None;
            row.file_id = None;
            row.error = None;
        })
        .await
    }

    async fn set_running(&self, load_id: Uuid, target_path: &str, flight_id: &str) -> Result<()> {
        let flight_id = flight_id.to_string();
        self.update_file(load_id, target_path, move |row| {
            row.state = LoadFileState::Running;
            row.flight_id = Some(flight_id);
        })
        .await
    }

    async fn set_succeeded(&self, load_id: Uuid, target_path: &str, file_id: Uuid) -> Result<()> {
        self.update_file(load_id, target_path, move |row| {
            row.state = LoadFileState::Succeeded;
            row.file_id = Some(file_id);
            row.error = None;
        })
        .await
    }

    async fn set_failed(&self, load_id: Uuid, target_path: &str, error: &str) -> Result<()> {
        let error = error.to_string();
        self.update_file(load_id, target_path, move |row| {
            row.state = LoadFileState::Failed;
            row.error = Some(error);
        })
        .await
    }

    async fn state_counts(&self, load_id: Uuid) -> Result<LoadStateCounts> {
        let inner = self.inner.lock().await;
        let rows = inner.files.get(&load_id).map(Vec::as_slice).unwrap_or(&[]);
        let mut counts = LoadStateCounts::default();
        for row in rows {
            counts.total_files += 1;
            match row.state {
                LoadFileState::Running => {
                    return Err(LoadError::CorruptState(
                        "no rows may be running when results are computed".to_string(),
                    ));
                },
                LoadFileState::Succeeded => counts.succeeded_files += 1,
                LoadFileState::Failed => counts.failed_files += 1,
                LoadFileState::NotTried => counts.not_tried_files += 1,
            }
        }
        Ok(counts)
    }

    async fn file_results(&self, load_id: Uuid) -> Result<Vec<BulkFileResult>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .files
            .get(&load_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(|row| BulkFileResult {
                source_path: row.source_path.clone(),
                target_path: row.target_path.clone(),
                state: row.state,
                file_id: row.file_id,
                error: row.error.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(target: &str) -> LoadFileSpec {
        LoadFileSpec {
            source_path: format!("s3://ext{target}"),
            target_path: target.to_string(),
            mime_type: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_lock_conflict_between_flights() {
        let store = MemoryLoadStore::new();
        store.lock_load("tag", "flight-1").await.unwrap();
        // Re-lock by the same flight is fine.
        store.lock_load("tag", "flight-1").await.unwrap();

        let err = store.lock_load("tag", "flight-2").await.unwrap_err();
        assert!(matches!(err, LoadError::LoadLocked { .. }));

        // Unlock by a non-holder is rejected; by the holder it works.
        assert!(store.unlock_load("tag", "flight-2").await.is_err());
        store.unlock_load("tag", "flight-1").await.unwrap();
        store.lock_load("tag", "flight-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_populate_is_idempotent_and_rejects_request_duplicates() {
        let store = MemoryLoadStore::new();
        let load_id = Uuid::new_v4();
        store
            .populate_files(load_id, &[spec("/a"), spec("/b")])
            .await
            .unwrap();
        store
            .populate_files(load_id, &[spec("/a"), spec("/b")])
            .await
            .unwrap();

        let counts = store.state_counts(load_id).await.unwrap();
        assert_eq!(counts.total_files, 2);

        let err = store
            .populate_files(load_id, &[spec("/c"), spec("/c")])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::DuplicateTargetPath(_)));
    }

    #[tokio::test]
    async fn test_candidate_limit_applies_to_not_tried_only() {
        let store = MemoryLoadStore::new();
        let load_id = Uuid::new_v4();
        let specs: Vec<_> = (0..5).map(|i| spec(&format!("/f{i}"))).collect();
        store.populate_files(load_id, &specs).await.unwrap();
        store.set_running(load_id, "/f0", "fl-0").await.unwrap();

        let candidates = store.find_candidates(load_id, 2).await.unwrap();
        assert_eq!(candidates.running_loads.len(), 1);
        assert_eq!(candidates.candidate_files.len(), 2);
        assert_eq!(candidates.failed_loads, 0);
    }

    #[tokio::test]
    async fn test_state_counts_refuses_running_rows() {
        let store = MemoryLoadStore::new();
        let load_id = Uuid::new_v4();
        store.populate_files(load_id, &[spec("/a")]).await.unwrap();
        store.set_running(load_id, "/a", "fl-1").await.unwrap();
        assert!(matches!(
            store.state_counts(load_id).await.unwrap_err(),
            LoadError::CorruptState(_)
        ));
    }
}
