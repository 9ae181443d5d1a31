//! Bulk-load flight definitions
//!
//! Two flight shapes cover ingestion:
//!
//! - [`file_load_flight`]: one file through the namespace-claim → copy →
//!   metadata-commit chain. Launched as sub-flights by the driver.
//! - [`bulk_load_flight`]: the meta-flight for a whole request: lock the
//!   load tag, populate the bookkeeping table, run either the scheduler
//!   driver or the pooled copier, aggregate results, clean up, unlock.
//!
//! Every step receives its collaborators explicitly through
//! [`IngestContext`]; there is no ambient registry to pull them from.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use depot_catalog::Catalog;
use depot_flight::{Flight, FlightError, FlightId, FlightRunner, FlightStatus};

use crate::config::IngestConfig;
use crate::copier::{BulkCopier, IdAllocation};
use crate::load::{BulkFileResult, BulkLoadResult, LoadFileSpec, LoadStore};
use crate::storage::{FileInfo, ObjectStore};

pub mod control_file;
pub mod steps;

mod driver;

pub use control_file::SpecResolveError;
pub use driver::IngestDriverStep;

/// Collaborators every ingest flight is built from.
#[derive(Clone)]
pub struct IngestContext {
    pub load_store: Arc<dyn LoadStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub catalog: Catalog,
    pub runner: Arc<FlightRunner>,
    pub config: IngestConfig,
}

/// Where the list of files to load comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BulkLoadSource {
    /// The request carried the items inline.
    Array { files: Vec<LoadFileSpec> },
    /// The items live in a newline-delimited JSON control file in the
    /// object store.
    ControlFile { path: String },
}

/// How the bulk flight executes its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkLoadMode {
    /// The scheduler loop: one durable sub-flight per file, bounded by
    /// the concurrency limit, with orphan recovery.
    Driver,
    /// The pooled copier: all items in one flight, batched onto a
    /// bounded worker pool.
    Batched,
}

/// Immutable input of a bulk-load flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkLoadInput {
    pub collection_id: Uuid,
    pub load_tag: String,
    pub source: BulkLoadSource,
    pub mode: BulkLoadMode,
    pub id_allocation: IdAllocation,
    /// Sources already resident in managed storage take the cheap link
    /// path instead of a copy.
    pub self_hosted: bool,
    /// Per-file failures tolerated before the job fails (-1 = unlimited).
    pub max_failed_file_loads: i64,
}

/// Failure summary recorded when the threshold trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkLoadFailure {
    pub message: String,
    /// The first per-item errors, capped at the concurrency limit; full
    /// detail stays in the per-file results.
    pub errors: Vec<String>,
}

/// Working state of a bulk-load flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkLoadState {
    /// Set by the lock step once the load row exists.
    pub load_id: Option<Uuid>,
    pub result: Option<BulkLoadResult>,
    pub file_results: Vec<BulkFileResult>,
    pub failure: Option<BulkLoadFailure>,
}

/// Immutable input of a single-file load flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLoadInput {
    pub collection_id: Uuid,
    pub load_tag: String,
    pub source_path: String,
    pub target_path: String,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub id_allocation: IdAllocation,
    pub self_hosted: bool,
}

/// Working state of a single-file load flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileLoadState {
    /// The id that ends up owning the target path (allocated, derived
    /// from the copy, or coalesced from an earlier attempt).
    pub file_id: Option<Uuid>,
    /// Physical facts from the copy/link, once it happened.
    pub file_info: Option<FileInfo>,
}

/// Build the per-file flight for the given id-allocation mode.
///
/// Random ids claim the namespace path before any bytes move; predictable
/// ids must copy first because the id is not known until the storage
/// layer reports it.
pub fn file_load_flight(
    deps: &IngestContext,
    id_allocation: IdAllocation,
) -> Flight<FileLoadInput, FileLoadState> {
    let fs_retry = deps.config.flight_retry();
    let copy_retry = deps.config.copy_retry();

    match id_allocation {
        IdAllocation::Random => Flight::new("file-load")
            .step(steps::AllocateFileIdStep)
            .step_with_retry(
                steps::CreateDirectoryEntryStep::new(deps.catalog.clone()),
                fs_retry.clone(),
            )
            .step_with_retry(
                steps::CopyFileStep::new(Arc::clone(&deps.object_store)),
                copy_retry,
            )
            .step_with_retry(
                steps::CreateFileMetadataStep::new(deps.catalog.clone()),
                fs_retry,
            ),
        IdAllocation::Predictable => Flight::new("file-load")
            .step_with_retry(
                steps::CopyFileStep::new(Arc::clone(&deps.object_store)),
                copy_retry,
            )
            .step_with_retry(
                steps::CreateDirectoryEntryStep::new(deps.catalog.clone()),
                fs_retry.clone(),
            )
            .step_with_retry(
                steps::CreateFileMetadataStep::new(deps.catalog.clone()),
                fs_retry,
            ),
    }
}

/// Build the bulk-load meta-flight for a request.
pub fn bulk_load_flight(
    deps: &IngestContext,
    input: &BulkLoadInput,
) -> Flight<BulkLoadInput, BulkLoadState> {
    let store_retry = deps.config.flight_retry();

    let flight = Flight::new("bulk-load")
        .step_with_retry(
            steps::LoadLockStep::new(Arc::clone(&deps.load_store)),
            store_retry.clone(),
        )
        .step_with_retry(
            steps::PopulateLoadTableStep::new(
                Arc::clone(&deps.load_store),
                Arc::clone(&deps.object_store),
                deps.config.max_bad_load_file_line_errors,
            ),
            store_retry.clone(),
        );

    let flight = match input.mode {
        BulkLoadMode::Driver => flight.step_with_retry(
            IngestDriverStep::new(deps.clone()),
            store_retry.clone(),
        ),
        BulkLoadMode::Batched => flight.step_with_retry(
            steps::BulkCopyStep::new(
                Arc::clone(&deps.load_store),
                BulkCopier::new(
                    Arc::clone(&deps.object_store),
                    deps.catalog.clone(),
                    &deps.config,
                ),
            ),
            store_retry.clone(),
        ),
    };

    flight
        .step_with_retry(
            steps::MakeBulkResultStep::new(Arc::clone(&deps.load_store)),
            store_retry.clone(),
        )
        .step_with_retry(
            steps::CleanLoadTableStep::new(Arc::clone(&deps.load_store)),
            store_retry.clone(),
        )
        .step_with_retry(
            steps::LoadUnlockStep::new(Arc::clone(&deps.load_store)),
            store_retry,
        )
}

/// Terminal view of one bulk-load job.
#[derive(Debug, Clone)]
pub struct BulkLoadOutcome {
    pub job_id: FlightId,
    pub status: FlightStatus,
    pub result: Option<BulkLoadResult>,
    pub file_results: Vec<BulkFileResult>,
    pub failure: Option<BulkLoadFailure>,
    /// Saga-level error (conflict, corrupt state) when the flight did not
    /// reach a clean success.
    pub error: Option<String>,
}

impl BulkLoadOutcome {
    /// True when every file landed and no failure was recorded.
    pub fn succeeded(&self) -> bool {
        self.status == FlightStatus::Success && self.failure.is_none()
    }
}

/// Front door for bulk loads: submit, wait, and map the flight's terminal
/// state into a caller-facing outcome.
#[derive(Clone)]
pub struct BulkLoadService {
    deps: IngestContext,
}

impl BulkLoadService {
    pub fn new(deps: IngestContext) -> Self {
        Self { deps }
    }

    pub fn context(&self) -> &IngestContext {
        &self.deps
    }

    /// Submit a bulk load and return its job id.
    pub async fn submit(&self, input: BulkLoadInput) -> depot_flight::Result<FlightId> {
        let flight = bulk_load_flight(&self.deps, &input);
        let job_id = self.deps.runner.create_flight_id();
        self.deps
            .runner
            .submit(&job_id, flight, input, BulkLoadState::default())
            .await?;
        Ok(job_id)
    }

    /// Wait for a job and assemble its outcome.
    pub async fn wait(&self, job_id: &FlightId) -> depot_flight::Result<BulkLoadOutcome> {
        let state = self
            .deps
            .runner
            .wait(job_id, self.deps.config.driver_wait())
            .await?;

        let flight_state: BulkLoadState = match &state.result {
            Some(value) => serde_json::from_value(value.clone()).map_err(FlightError::from)?,
            None => BulkLoadState::default(),
        };
        Ok(BulkLoadOutcome {
            job_id: job_id.clone(),
            status: state.status,
            result: flight_state.result,
            file_results: flight_state.file_results,
            failure: flight_state.failure,
            error: state.error,
        })
    }

    /// Submit and wait in one call.
    pub async fn run(&self, input: BulkLoadInput) -> depot_flight::Result<BulkLoadOutcome> {
        let job_id = self.submit(input).await?;
        self.wait(&job_id).await
    }
}
