//! Ingest flight steps
//!
//! Every step is idempotent against a partially-applied world: a crash
//! can re-invoke any `run`, so each one either coalesces with what a
//! previous attempt left behind or checks the working state for evidence
//! the work already happened.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use depot_catalog::{Catalog, CatalogError, DirectoryEntry, FileMetadata};
use depot_flight::{FlightContext, Step, StepResult};

use super::control_file::{resolve_specs, SpecResolveError};
use super::{BulkLoadFailure, BulkLoadInput, BulkLoadState, FileLoadInput, FileLoadState};
use crate::copier::BulkCopier;
use crate::load::{BulkLoadResult, LoadError, LoadFileState, LoadStore};
use crate::storage::{ObjectStore, StorageError};

fn catalog_failure(e: CatalogError) -> StepResult {
    match e {
        CatalogError::Store(_) => StepResult::retry(e.to_string()),
        _ => StepResult::fatal(e.to_string()),
    }
}

fn load_failure(e: LoadError) -> StepResult {
    match e {
        LoadError::Store(_) => StepResult::retry(e.to_string()),
        _ => StepResult::fatal(e.to_string()),
    }
}

fn storage_failure(e: StorageError) -> StepResult {
    if e.is_transient() {
        StepResult::retry(e.to_string())
    } else {
        StepResult::fatal(e.to_string())
    }
}

// ============================================================================
// Single-file flight steps
// ============================================================================

/// Pre-allocate the file id (random-id collections). The id must exist
/// in the working state before any side effect so the later undos know
/// what to clean up.
pub struct AllocateFileIdStep;

#[async_trait]
impl Step<FileLoadInput, FileLoadState> for AllocateFileIdStep {
    fn name(&self) -> &'static str {
        "allocate-file-id"
    }

    async fn run(&self, ctx: &mut FlightContext<FileLoadInput, FileLoadState>) -> StepResult {
        if ctx.state.file_id.is_none() {
            ctx.state.file_id = Some(Uuid::new_v4());
        }
        StepResult::success()
    }
}

/// Claim the target path in the namespace. The claim is what prevents a
/// second load tag from landing on the same path; a retry under the same
/// tag coalesces and adopts the existing id.
pub struct CreateDirectoryEntryStep {
    catalog: Catalog,
}

impl CreateDirectoryEntryStep {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Step<FileLoadInput, FileLoadState> for CreateDirectoryEntryStep {
    fn name(&self) -> &'static str {
        "create-directory-entry"
    }

    async fn run(&self, ctx: &mut FlightContext<FileLoadInput, FileLoadState>) -> StepResult {
        let Some(file_id) = ctx.state.file_id else {
            return StepResult::fatal("no file id in working state");
        };
        let entry = DirectoryEntry::new_file_ref(
            ctx.input.collection_id,
            file_id,
            &ctx.input.target_path,
            &ctx.input.load_tag,
        );
        match self
            .catalog
            .create_directory_entry(ctx.input.collection_id, entry)
            .await
        {
            Ok(effective_id) => {
                ctx.state.file_id = Some(effective_id);
                StepResult::success()
            },
            Err(e) => catalog_failure(e),
        }
    }

    async fn undo(&self, ctx: &mut FlightContext<FileLoadInput, FileLoadState>) -> StepResult {
        let Some(file_id) = ctx.state.file_id else {
            return StepResult::success();
        };
        match self
            .catalog
            .delete_directory_entry(ctx.input.collection_id, file_id)
            .await
        {
            Ok(_) => StepResult::success(),
            Err(e) => catalog_failure(e),
        }
    }
}

/// Move the bytes: copy the source into managed storage, or link it when
/// the source is already resident. Physical facts land in the working
/// state for the metadata commit.
pub struct CopyFileStep {
    object_store: Arc<dyn ObjectStore>,
}

impl CopyFileStep {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }
}

#[async_trait]
impl Step<FileLoadInput, FileLoadState> for CopyFileStep {
    fn name(&self) -> &'static str {
        "copy-file"
    }

    async fn run(&self, ctx: &mut FlightContext<FileLoadInput, FileLoadState>) -> StepResult {
        let operation = if ctx.input.self_hosted {
            self.object_store
                .link(&ctx.input.source_path, ctx.state.file_id)
                .await
        } else {
            self.object_store
                .copy(
                    &ctx.input.source_path,
                    &ctx.input.target_path,
                    ctx.state.file_id,
                )
                .await
        };

        match operation {
            Ok(info) => {
                ctx.state.file_id = Some(info.file_id);
                ctx.state.file_info = Some(info);
                StepResult::success()
            },
            Err(e) => storage_failure(e),
        }
    }

    async fn undo(&self, ctx: &mut FlightContext<FileLoadInput, FileLoadState>) -> StepResult {
        let Some(info) = &ctx.state.file_info else {
            return StepResult::success();
        };
        let result = if ctx.input.self_hosted {
            // Shared links are never race-deleted; dropping our usage is
            // enough.
            self.object_store.unlink(&info.cloud_path).await
        } else {
            self.object_store.delete(&info.cloud_path).await.map(|_| ())
        };
        match result {
            Ok(()) => StepResult::success(),
            Err(e) => storage_failure(e),
        }
    }
}

/// Commit the file metadata record, the write that makes the file
/// visible to lookups.
pub struct CreateFileMetadataStep {
    catalog: Catalog,
}

impl CreateFileMetadataStep {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Step<FileLoadInput, FileLoadState> for CreateFileMetadataStep {
    fn name(&self) -> &'static str {
        "create-file-metadata"
    }

    async fn run(&self, ctx: &mut FlightContext<FileLoadInput, FileLoadState>) -> StepResult {
        let (Some(file_id), Some(info)) = (ctx.state.file_id, &ctx.state.file_info) else {
            return StepResult::fatal("no copy result in working state");
        };
        let metadata = FileMetadata {
            file_id,
            mime_type: ctx.input.mime_type.clone(),
            description: ctx.input.description.clone(),
            bucket_resource_id: info.bucket_resource_id.clone(),
            cloud_path: info.cloud_path.clone(),
            checksum_crc32c: info.checksum_crc32c.clone(),
            checksum_md5: info.checksum_md5.clone(),
            size: info.size,
            load_tag: ctx.input.load_tag.clone(),
            created_date: Utc::now(),
        };
        match self
            .catalog
            .upsert_file_metadata(ctx.input.collection_id, std::slice::from_ref(&metadata))
            .await
        {
            Ok(()) => StepResult::success(),
            Err(e) => catalog_failure(e),
        }
    }

    async fn undo(&self, ctx: &mut FlightContext<FileLoadInput, FileLoadState>) -> StepResult {
        let Some(file_id) = ctx.state.file_id else {
            return StepResult::success();
        };
        match self
            .catalog
            .delete_file_metadata(ctx.input.collection_id, file_id)
            .await
        {
            Ok(_) => StepResult::success(),
            Err(e) => catalog_failure(e),
        }
    }
}

// ============================================================================
// Bulk flight steps
// ============================================================================

/// Take the load-tag lock: one flight works a tag at a time. A resumed
/// flight re-locks its own tag without conflict.
pub struct LoadLockStep {
    load_store: Arc<dyn LoadStore>,
}

impl LoadLockStep {
    pub fn new(load_store: Arc<dyn LoadStore>) -> Self {
        Self { load_store }
    }
}

#[async_trait]
impl Step<BulkLoadInput, BulkLoadState> for LoadLockStep {
    fn name(&self) -> &'static str {
        "load-lock"
    }

    async fn run(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        match self
            .load_store
            .lock_load(&ctx.input.load_tag, ctx.flight_id.as_str())
            .await
        {
            Ok(load) => {
                ctx.state.load_id = Some(load.load_id);
                StepResult::success()
            },
            Err(e) => load_failure(e),
        }
    }

    async fn undo(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        match self
            .load_store
            .unlock_load(&ctx.input.load_tag, ctx.flight_id.as_str())
            .await
        {
            Ok(()) => StepResult::success(),
            Err(e) => load_failure(e),
        }
    }
}

/// Resolve the request's items (inline array or control file) and
/// register them as `NotTried` bookkeeping rows.
pub struct PopulateLoadTableStep {
    load_store: Arc<dyn LoadStore>,
    object_store: Arc<dyn ObjectStore>,
    max_bad_lines: usize,
}

impl PopulateLoadTableStep {
    pub fn new(
        load_store: Arc<dyn LoadStore>,
        object_store: Arc<dyn ObjectStore>,
        max_bad_lines: usize,
    ) -> Self {
        Self {
            load_store,
            object_store,
            max_bad_lines,
        }
    }
}

#[async_trait]
impl Step<BulkLoadInput, BulkLoadState> for PopulateLoadTableStep {
    fn name(&self) -> &'static str {
        "populate-load-table"
    }

    async fn run(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        let Some(load_id) = ctx.state.load_id else {
            return StepResult::fatal("no load id in working state");
        };
        let specs = match resolve_specs(
            self.object_store.as_ref(),
            &ctx.input.source,
            self.max_bad_lines,
        )
        .await
        {
            Ok(specs) => specs,
            Err(SpecResolveError::Storage(e)) => return storage_failure(e),
            Err(e) => return StepResult::fatal(e.to_string()),
        };

        debug!(load_id = %load_id, files = specs.len(), "Populating load table");
        match self.load_store.populate_files(load_id, &specs).await {
            Ok(()) => StepResult::success(),
            Err(e) => load_failure(e),
        }
    }

    async fn undo(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        let Some(load_id) = ctx.state.load_id else {
            return StepResult::success();
        };
        match self.load_store.clean_files(load_id).await {
            Ok(()) => StepResult::success(),
            Err(e) => load_failure(e),
        }
    }
}

/// Run the whole load through the pooled copier in one step, then record
/// per-item outcomes in the bookkeeping rows.
pub struct BulkCopyStep {
    load_store: Arc<dyn LoadStore>,
    copier: BulkCopier,
}

impl BulkCopyStep {
    pub fn new(load_store: Arc<dyn LoadStore>, copier: BulkCopier) -> Self {
        Self { load_store, copier }
    }
}

#[async_trait]
impl Step<BulkLoadInput, BulkLoadState> for BulkCopyStep {
    fn name(&self) -> &'static str {
        "bulk-copy"
    }

    async fn run(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        let Some(load_id) = ctx.state.load_id else {
            return StepResult::fatal("no load id in working state");
        };

        // Everything not yet terminal is (re)copied; the engine coalesces
        // with whatever an interrupted attempt already wrote.
        let candidates = match self.load_store.find_candidates(load_id, usize::MAX).await {
            Ok(c) => c,
            Err(e) => return load_failure(e),
        };
        let specs: Vec<_> = candidates
            .candidate_files
            .iter()
            .map(|f| crate::load::LoadFileSpec {
                source_path: f.source_path.clone(),
                target_path: f.target_path.clone(),
                mime_type: f.mime_type.clone(),
                description: f.description.clone(),
            })
            .collect();

        let outcome = match self
            .copier
            .run(
                ctx.input.collection_id,
                &ctx.input.load_tag,
                ctx.input.id_allocation,
                ctx.input.self_hosted,
                &specs,
                ctx.input.max_failed_file_loads,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return catalog_failure(e),
        };

        for result in &outcome.file_results {
            let recorded = match result.state {
                LoadFileState::Succeeded => match result.file_id {
                    Some(file_id) => {
                        self.load_store
                            .set_succeeded(load_id, &result.target_path, file_id)
                            .await
                    },
                    None => Err(LoadError::CorruptState(format!(
                        "succeeded file {} has no id",
                        result.target_path
                    ))),
                },
                _ => {
                    self.load_store
                        .set_failed(
                            load_id,
                            &result.target_path,
                            result.error.as_deref().unwrap_or("unknown copy failure"),
                        )
                        .await
                },
            };
            if let Err(e) = recorded {
                return load_failure(e);
            }
        }

        if outcome.threshold_exceeded {
            let message = format!(
                "More than {} file(s) failed to ingest, which was the allowed amount. \
                 See error details for the first {} error(s).",
                ctx.input.max_failed_file_loads,
                outcome.errors.len()
            );
            ctx.state.failure = Some(BulkLoadFailure {
                message: message.clone(),
                errors: outcome.errors.clone(),
            });
            if let Err(e) = record_results(&*self.load_store, ctx, load_id).await {
                return e;
            }
            return StepResult::fatal(message);
        }
        StepResult::success()
    }
}

/// Aggregate the drained load into the caller-facing summary and detail
/// list.
pub struct MakeBulkResultStep {
    load_store: Arc<dyn LoadStore>,
}

impl MakeBulkResultStep {
    pub fn new(load_store: Arc<dyn LoadStore>) -> Self {
        Self { load_store }
    }
}

#[async_trait]
impl Step<BulkLoadInput, BulkLoadState> for MakeBulkResultStep {
    fn name(&self) -> &'static str {
        "make-bulk-result"
    }

    async fn run(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        let Some(load_id) = ctx.state.load_id else {
            return StepResult::fatal("no load id in working state");
        };
        match record_results(&*self.load_store, ctx, load_id).await {
            Ok(()) => StepResult::success(),
            Err(failure) => failure,
        }
    }
}

/// Write the current counts and per-file detail into the working state.
async fn record_results(
    load_store: &dyn LoadStore,
    ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>,
    load_id: Uuid,
) -> std::result::Result<(), StepResult> {
    let counts = load_store
        .state_counts(load_id)
        .await
        .map_err(load_failure)?;
    ctx.state.result = Some(BulkLoadResult::new(
        &ctx.input.load_tag,
        ctx.flight_id.as_str(),
        counts,
    ));
    ctx.state.file_results = load_store
        .file_results(load_id)
        .await
        .map_err(load_failure)?;
    Ok(())
}

/// Drop the bookkeeping rows once the result has been captured in the
/// flight state.
pub struct CleanLoadTableStep {
    load_store: Arc<dyn LoadStore>,
}

impl CleanLoadTableStep {
    pub fn new(load_store: Arc<dyn LoadStore>) -> Self {
        Self { load_store }
    }
}

#[async_trait]
impl Step<BulkLoadInput, BulkLoadState> for CleanLoadTableStep {
    fn name(&self) -> &'static str {
        "clean-load-table"
    }

    async fn run(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        let Some(load_id) = ctx.state.load_id else {
            return StepResult::success();
        };
        match self.load_store.clean_files(load_id).await {
            Ok(()) => StepResult::success(),
            Err(e) => load_failure(e),
        }
    }
}

/// Release the load-tag lock.
pub struct LoadUnlockStep {
    load_store: Arc<dyn LoadStore>,
}

impl LoadUnlockStep {
    pub fn new(load_store: Arc<dyn LoadStore>) -> Self {
        Self { load_store }
    }
}

#[async_trait]
impl Step<BulkLoadInput, BulkLoadState> for LoadUnlockStep {
    fn name(&self) -> &'static str {
        "load-unlock"
    }

    async fn run(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        match self
            .load_store
            .unlock_load(&ctx.input.load_tag, ctx.flight_id.as_str())
            .await
        {
            Ok(()) => StepResult::success(),
            Err(e) => {
                warn!(load_tag = %ctx.input.load_tag, error = %e, "Failed to unlock load");
                load_failure(e)
            },
        }
    }
}
