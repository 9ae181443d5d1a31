//! Parallel copy/link engine
//!
//! Moves a batch of files into managed storage and commits their catalog
//! records, bounding concurrency with explicit backpressure: items are
//! partitioned into batches the size of the worker pool and each batch is
//! fully awaited before the next is submitted, so never more than one
//! batch's worth of work is in flight.
//!
//! Per-item transient failures are retried a small fixed number of times
//! with a fixed delay, then recorded as permanent per-item failures.
//! Permanent failures are collected, never thrown; only the configured
//! failure threshold turns them into a batch-level failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use depot_catalog::{Catalog, DirectoryEntry, FileMetadata};

use crate::config::IngestConfig;
use crate::load::{BulkFileResult, LoadFileSpec, LoadFileState};
use crate::storage::{FileInfo, ObjectStore};

/// How file ids are assigned for a target collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdAllocation {
    /// Ids derive from the copy/link operation itself, so bytes must move
    /// before the namespace entry can be written.
    Predictable,
    /// Ids are pre-allocated per target path, so the namespace entry can
    /// claim the path before any I/O happens.
    Random,
}

/// Result of one item's copy or link.
#[derive(Debug, Clone)]
struct CopyResult {
    source_path: String,
    target_path: String,
    file_info: Option<FileInfo>,
    error: Option<String>,
}

/// Aggregate outcome of one bulk copy run.
#[derive(Debug, Clone, Default)]
pub struct BulkCopyOutcome {
    pub total_files: i64,
    pub succeeded_files: i64,
    pub failed_files: i64,
    /// Per-item detail in input order, with final (reconciled) file ids.
    pub file_results: Vec<BulkFileResult>,
    /// Messages of the permanent per-item failures.
    pub errors: Vec<String>,
    /// Whether permanent failures exceeded the configured threshold.
    pub threshold_exceeded: bool,
}

/// Bounded-fan-out engine copying or linking files and committing their
/// metadata.
#[derive(Clone)]
pub struct BulkCopier {
    object_store: Arc<dyn ObjectStore>,
    catalog: Catalog,
    pool_size: usize,
    retry_attempts: u32,
    retry_wait: Duration,
}

impl BulkCopier {
    pub fn new(object_store: Arc<dyn ObjectStore>, catalog: Catalog, config: &IngestConfig) -> Self {
        Self {
            object_store,
            catalog,
            pool_size: config.copy_pool_size.max(1),
            retry_attempts: config.copy_retry_attempts.max(1),
            retry_wait: config.copy_retry_wait(),
        }
    }

    /// Run the whole batch: copy or link every item, commit directory
    /// entries and file metadata in the order the id mode requires, and
    /// summarize. The threshold only marks the outcome; deciding what a
    /// marked outcome does to the enclosing flight is the caller's call.
    ///
    /// # Errors
    ///
    /// Propagates catalog failures; in particular a load-tag conflict
    /// ([`CatalogError::FileAlreadyExists`](depot_catalog::CatalogError))
    /// aborts the run.
    pub async fn run(
        &self,
        collection_id: Uuid,
        load_tag: &str,
        id_allocation: IdAllocation,
        self_hosted: bool,
        specs: &[LoadFileSpec],
        max_failed_file_loads: i64,
    ) -> depot_catalog::Result<BulkCopyOutcome> {
        info!(
            collection_id = %collection_id,
            load_tag = %load_tag,
            files = specs.len(),
            mode = ?id_allocation,
            "Starting bulk copy"
        );

        let mut file_ids_by_path: HashMap<String, Uuid> = HashMap::new();
        let copy_results = match id_allocation {
            IdAllocation::Predictable => {
                // Bytes first: the id is not known until the storage layer
                // reports it. Entries are created only for items that
                // actually copied, with the ids the copy produced.
                let results = self.copy_all(specs, &file_ids_by_path, self_hosted).await;
                for result in results.iter().filter(|r| r.file_info.is_some()) {
                    if let Some(info) = &result.file_info {
                        file_ids_by_path.insert(result.target_path.clone(), info.file_id);
                    }
                }
                let claimed: Vec<&LoadFileSpec> = specs
                    .iter()
                    .filter(|s| file_ids_by_path.contains_key(&s.target_path))
                    .collect();
                self.claim_paths(collection_id, load_tag, &claimed, &mut file_ids_by_path)
                    .await?;
                results
            },
            IdAllocation::Random => {
                // Entries first: pre-allocated ids let the namespace claim
                // every target path before any bytes move, so a competing
                // load tag is rejected before wasting I/O.
                for spec in specs {
                    file_ids_by_path.insert(spec.target_path.clone(), Uuid::new_v4());
                }
                let all: Vec<&LoadFileSpec> = specs.iter().collect();
                self.claim_paths(collection_id, load_tag, &all, &mut file_ids_by_path)
                    .await?;
                self.copy_all(specs, &file_ids_by_path, self_hosted).await
            },
        };

        // Commit file metadata for everything that copied, using the
        // reconciled ids so records pair with the entries that exist.
        let metadata: Vec<FileMetadata> = copy_results
            .iter()
            .filter_map(|result| {
                let info = result.file_info.as_ref()?;
                let spec = specs.iter().find(|s| s.target_path == result.target_path)?;
                let file_id = *file_ids_by_path.get(&result.target_path)?;
                Some(FileMetadata {
                    file_id,
                    mime_type: spec.mime_type.clone(),
                    description: spec.description.clone(),
                    bucket_resource_id: info.bucket_resource_id.clone(),
                    cloud_path: info.cloud_path.clone(),
                    checksum_crc32c: info.checksum_crc32c.clone(),
                    checksum_md5: info.checksum_md5.clone(),
                    size: info.size,
                    load_tag: load_tag.to_string(),
                    created_date: info.created_date,
                })
            })
            .collect();
        self.catalog
            .upsert_file_metadata(collection_id, &metadata)
            .await?;

        Ok(self.summarize(copy_results, &file_ids_by_path, max_failed_file_loads))
    }

    /// Upsert leaf entries for the given specs and fold the resulting
    /// conflict map back into the id index.
    async fn claim_paths(
        &self,
        collection_id: Uuid,
        load_tag: &str,
        specs: &[&LoadFileSpec],
        file_ids_by_path: &mut HashMap<String, Uuid>,
    ) -> depot_catalog::Result<()> {
        let leaves: Vec<DirectoryEntry> = specs
            .iter()
            .filter_map(|spec| {
                file_ids_by_path.get(&spec.target_path).map(|id| {
                    DirectoryEntry::new_file_ref(collection_id, *id, &spec.target_path, load_tag)
                })
            })
            .collect();

        let conflicts = self
            .catalog
            .upsert_directory_entries(collection_id, &leaves)
            .await?;
        if conflicts.is_empty() {
            return Ok(());
        }

        debug!(conflicts = conflicts.len(), "Reconciling ids from earlier attempt");
        for id in file_ids_by_path.values_mut() {
            if let Some(existing) = conflicts.get(id) {
                *id = *existing;
            }
        }
        Ok(())
    }

    /// Copy or link every item with one-batch-in-flight backpressure,
    /// returning per-item results in input order.
    async fn copy_all(
        &self,
        specs: &[LoadFileSpec],
        file_ids_by_path: &HashMap<String, Uuid>,
        self_hosted: bool,
    ) -> Vec<CopyResult> {
        let mut results: Vec<Option<CopyResult>> = vec![None; specs.len()];

        for batch_start in (0..specs.len()).step_by(self.pool_size) {
            let batch = &specs[batch_start..(batch_start + self.pool_size).min(specs.len())];
            let mut workers: JoinSet<(usize, CopyResult)> = JoinSet::new();

            for (offset, spec) in batch.iter().enumerate() {
                let index = batch_start + offset;
                let spec = spec.clone();
                let file_id = file_ids_by_path.get(&spec.target_path).copied();
                let store = Arc::clone(&self.object_store);
                let attempts = self.retry_attempts;
                let wait = self.retry_wait;

                workers.spawn(async move {
                    let result = copy_one(store, spec, file_id, self_hosted, attempts, wait).await;
                    (index, result)
                });
            }

            // Backpressure: the whole batch drains before the next one is
            // submitted.
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok((index, result)) => results[index] = Some(result),
                    Err(e) => warn!(error = %e, "Copy worker aborted"),
                }
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| CopyResult {
                    source_path: specs[i].source_path.clone(),
                    target_path: specs[i].target_path.clone(),
                    file_info: None,
                    error: Some("copy worker aborted".to_string()),
                })
            })
            .collect()
    }

    fn summarize(
        &self,
        copy_results: Vec<CopyResult>,
        file_ids_by_path: &HashMap<String, Uuid>,
        max_failed_file_loads: i64,
    ) -> BulkCopyOutcome {
        let mut outcome = BulkCopyOutcome {
            total_files: copy_results.len() as i64,
            ..BulkCopyOutcome::default()
        };

        for result in copy_results {
            if result.file_info.is_some() {
                outcome.succeeded_files += 1;
                outcome.file_results.push(BulkFileResult {
                    file_id: file_ids_by_path.get(&result.target_path).copied(),
                    source_path: result.source_path,
                    target_path: result.target_path,
                    state: LoadFileState::Succeeded,
                    error: None,
                });
            } else {
                let message = format!(
                    "{} -> {}: {}",
                    result.source_path,
                    result.target_path,
                    result.error.as_deref().unwrap_or("unknown copy failure")
                );
                outcome.failed_files += 1;
                outcome.errors.push(message);
                outcome.file_results.push(BulkFileResult {
                    file_id: None,
                    source_path: result.source_path,
                    target_path: result.target_path,
                    state: LoadFileState::Failed,
                    error: result.error,
                });
            }
        }

        outcome.threshold_exceeded =
            max_failed_file_loads != -1 && outcome.failed_files > max_failed_file_loads;
        if outcome.threshold_exceeded {
            warn!(
                failed = outcome.failed_files,
                allowed = max_failed_file_loads,
                "Bulk copy exceeded the failure threshold"
            );
        }
        outcome
    }
}

/// Copy or link one item, retrying transient failures a fixed number of
/// times with a fixed delay.
async fn copy_one(
    store: Arc<dyn ObjectStore>,
    spec: LoadFileSpec,
    file_id: Option<Uuid>,
    self_hosted: bool,
    attempts: u32,
    wait: Duration,
) -> CopyResult {
    let mut attempts_left = attempts;
    loop {
        let operation = if self_hosted {
            store.link(&spec.source_path, file_id).await
        } else {
            store.copy(&spec.source_path, &spec.target_path, file_id).await
        };

        match operation {
            Ok(info) => {
                return CopyResult {
                    source_path: spec.source_path,
                    target_path: spec.target_path,
                    file_info: Some(info),
                    error: None,
                };
            },
            Err(e) if e.is_transient() && attempts_left > 1 => {
                attempts_left -= 1;
                debug!(
                    source = %spec.source_path,
                    attempts_left,
                    error = %e,
                    "Transient copy failure, will retry"
                );
                tokio::time::sleep(wait).await;
            },
            Err(e) => {
                warn!(source = %spec.source_path, error = %e, "Copy failed");
                return CopyResult {
                    source_path: spec.source_path,
                    target_path: spec.target_path,
                    file_info: None,
                    error: Some(e.to_string()),
                };
            },
        }
    }
}
