//! Ingest driver step
//!
//! The core of the bulk-load meta-flight: a scheduling loop that keeps up
//! to the configured number of per-file sub-flights busy until the load
//! drains. Each iteration reconciles the bookkeeping rows against the
//! runner's authoritative flight states, launches new sub-flights into
//! free slots, and enforces the failure-threshold circuit breaker.
//!
//! Orphan recovery: a row is marked `Running` (with its flight id)
//! *before* the sub-flight is submitted. A crash in that window leaves a
//! row pointing at a flight the runner has never seen; the check at loop
//! start reverts such rows to `NotTried` so they are simply retried.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use depot_flight::{FlightContext, FlightError, FlightId, FlightStatus, Step, StepResult};

use super::{
    file_load_flight, BulkLoadFailure, BulkLoadInput, BulkLoadState, FileLoadInput,
    FileLoadState, IngestContext,
};
use crate::load::{BulkLoadResult, LoadCandidates, LoadError, LoadFile};

#[derive(Error, Debug)]
enum DriverError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Flight(#[from] FlightError),

    #[error("Load bookkeeping is corrupt: {0}")]
    Corrupt(String),
}

impl DriverError {
    /// One place decides retry versus fatal for everything the loop can
    /// hit. Unknown flight ids retry the whole step: the re-run's orphan
    /// check repairs them.
    fn into_step_failure(self) -> StepResult {
        match &self {
            DriverError::Load(LoadError::Store(_))
            | DriverError::Flight(FlightError::Log(_))
            | DriverError::Flight(FlightError::UnknownFlight(_)) => {
                StepResult::retry(self.to_string())
            },
            _ => StepResult::fatal(self.to_string()),
        }
    }
}

type DriverResult<T> = std::result::Result<T, DriverError>;

/// The scheduler loop, packaged as one step of the bulk-load flight. It
/// occupies its pool slot for the lifetime of the job while its
/// sub-flights consume further slots.
pub struct IngestDriverStep {
    deps: IngestContext,
}

impl IngestDriverStep {
    pub fn new(deps: IngestContext) -> Self {
        Self { deps }
    }

    /// Revert rows marked running whose flight the runner has no record
    /// of. Those were claimed but never submitted.
    async fn check_for_orphans(&self, load_id: Uuid) -> DriverResult<()> {
        for load in self.deps.load_store.find_running(load_id).await? {
            let known = match &load.flight_id {
                Some(flight_id) => {
                    match self.deps.runner.status(&FlightId::new(flight_id.clone())).await {
                        Ok(_) => true,
                        Err(FlightError::UnknownFlight(_)) => false,
                        Err(e) => return Err(e.into()),
                    }
                },
                None => false,
            };
            if !known {
                info!(
                    load_id = %load_id,
                    target_path = %load.target_path,
                    "Resetting orphan file load from running to not tried"
                );
                self.deps
                    .load_store
                    .set_not_tried(load_id, &load.target_path)
                    .await?;
            }
        }
        Ok(())
    }

    /// The bookkeeping view of the load, reconciled against the runner:
    /// rows whose sub-flight reached a terminal state are marked and
    /// their flight records archived, and the failure count updated to
    /// reflect the state right now.
    async fn load_candidates(
        &self,
        load_id: Uuid,
        candidate_limit: usize,
    ) -> DriverResult<LoadCandidates> {
        let mut candidates = self
            .deps
            .load_store
            .find_candidates(load_id, candidate_limit)
            .await?;
        let mut failed = candidates.failed_loads;
        let mut still_running = Vec::new();

        for load in std::mem::take(&mut candidates.running_loads) {
            let Some(flight_id) = load.flight_id.clone() else {
                return Err(DriverError::Corrupt(format!(
                    "running row {} has no flight id",
                    load.target_path
                )));
            };
            let flight_id = FlightId::new(flight_id);
            let state = self.deps.runner.status(&flight_id).await?;

            match state.status {
                FlightStatus::Running => {
                    still_running.push(load);
                },
                FlightStatus::Success => {
                    let result: FileLoadState = state.result_as()?;
                    let file_id = result.file_id.ok_or_else(|| {
                        DriverError::Corrupt(format!(
                            "flight {flight_id} succeeded without a file id"
                        ))
                    })?;
                    self.deps
                        .load_store
                        .set_succeeded(load_id, &load.target_path, file_id)
                        .await?;
                    // Result consumed; archive the sub-flight.
                    self.deps.runner.delete(&flight_id).await?;
                },
                FlightStatus::Error | FlightStatus::Fatal => {
                    let error = state.error.unwrap_or_else(|| "unknown error".to_string());
                    debug!(flight_id = %flight_id, error = %error, "Sub-flight failed");
                    self.deps
                        .load_store
                        .set_failed(load_id, &load.target_path, &error)
                        .await?;
                    failed += 1;
                    self.deps.runner.delete(&flight_id).await?;
                },
            }
        }

        candidates.failed_loads = failed;
        candidates.running_loads = still_running;
        Ok(candidates)
    }

    async fn launch_loads(
        &self,
        ctx_input: &BulkLoadInput,
        load_id: Uuid,
        candidates: &[LoadFile],
    ) -> DriverResult<()> {
        for load in candidates {
            let flight_id = self.deps.runner.create_flight_id();
            let input = FileLoadInput {
                collection_id: ctx_input.collection_id,
                load_tag: ctx_input.load_tag.clone(),
                source_path: load.source_path.clone(),
                target_path: load.target_path.clone(),
                mime_type: load.mime_type.clone(),
                description: load.description.clone(),
                id_allocation: ctx_input.id_allocation,
                self_hosted: ctx_input.self_hosted,
            };

            debug!(flight_id = %flight_id, target_path = %load.target_path, "Launching file load");
            self.deps
                .load_store
                .set_running(load_id, &load.target_path, flight_id.as_str())
                .await?;
            // This is the window where the row says running but the
            // flight has not been submitted. A failure here leaves an
            // orphan, repaired by the check at loop start.
            self.deps
                .runner
                .submit(
                    &flight_id,
                    file_load_flight(&self.deps, ctx_input.id_allocation),
                    input,
                    FileLoadState::default(),
                )
                .await?;
        }
        Ok(())
    }

    /// Wait until at least one slot frees up. The state is re-checked
    /// before any sleep: with many files in flight something is usually
    /// already done, so only sleep when nothing new turned up.
    async fn wait_for_any(
        &self,
        load_id: Uuid,
        candidate_limit: usize,
        originally_running: usize,
    ) -> DriverResult<()> {
        loop {
            let candidates = self.load_candidates(load_id, candidate_limit).await?;
            if candidates.running_loads.len() < originally_running {
                return Ok(());
            }
            self.waiting().await;
        }
    }

    /// Drain every running sub-flight (threshold breaker path).
    async fn wait_for_all(&self, load_id: Uuid, candidate_limit: usize) -> DriverResult<()> {
        loop {
            self.waiting().await;
            let candidates = self.load_candidates(load_id, candidate_limit).await?;
            if candidates.running_loads.is_empty() {
                return Ok(());
            }
        }
    }

    async fn waiting(&self) {
        debug!("Waiting for file loads to complete...");
        tokio::time::sleep(self.deps.config.driver_wait()).await;
    }
}

#[async_trait]
impl Step<BulkLoadInput, BulkLoadState> for IngestDriverStep {
    fn name(&self) -> &'static str {
        "ingest-driver"
    }

    async fn run(&self, ctx: &mut FlightContext<BulkLoadInput, BulkLoadState>) -> StepResult {
        let Some(load_id) = ctx.state.load_id else {
            return StepResult::fatal("no load id in working state");
        };
        let concurrent_files = self.deps.config.load_concurrent_files.max(1);
        let max_failed = ctx.input.max_failed_file_loads;
        let mut threshold_tripped = false;

        let looped: DriverResult<()> = async {
            self.check_for_orphans(load_id).await?;

            loop {
                let candidates = self.load_candidates(load_id, concurrent_files).await?;
                let currently_running = candidates.running_loads.len();
                let candidate_count = candidates.candidate_files.len();

                if max_failed != -1 && candidates.failed_loads > max_failed {
                    threshold_tripped = true;
                }

                if currently_running == 0 && candidate_count == 0 {
                    // Nothing doing and nothing to do.
                    break;
                }

                if threshold_tripped {
                    self.wait_for_all(load_id, concurrent_files).await?;
                    break;
                }

                let mut running_after_launch = currently_running;
                if currently_running < concurrent_files {
                    let launch_count =
                        (concurrent_files - currently_running).min(candidate_count);
                    self.launch_loads(
                        &ctx.input,
                        load_id,
                        &candidates.candidate_files[..launch_count],
                    )
                    .await?;
                    running_after_launch += launch_count;
                }

                self.wait_for_any(load_id, concurrent_files, running_after_launch)
                    .await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = looped {
            return e.into_step_failure();
        }

        // The load is drained; capture the summary while the rows still
        // exist (a tripped threshold unwinds the populate step).
        let counts = match self.deps.load_store.state_counts(load_id).await {
            Ok(counts) => counts,
            Err(e) => return DriverError::from(e).into_step_failure(),
        };
        ctx.state.result = Some(BulkLoadResult::new(
            &ctx.input.load_tag,
            ctx.flight_id.as_str(),
            counts,
        ));
        ctx.state.file_results = match self.deps.load_store.file_results(load_id).await {
            Ok(results) => results,
            Err(e) => return DriverError::from(e).into_step_failure(),
        };

        if threshold_tripped {
            let failed = match self
                .deps
                .load_store
                .find_failed(load_id, concurrent_files)
                .await
            {
                Ok(failed) => failed,
                Err(e) => return DriverError::from(e).into_step_failure(),
            };
            let errors: Vec<String> = failed
                .iter()
                .map(|f| {
                    format!(
                        "{} -> {}: {}",
                        f.source_path,
                        f.target_path,
                        f.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect();
            let message = format!(
                "More than {} file(s) failed to ingest, which was the allowed amount. \
                 See error details for the first {} error(s).",
                max_failed,
                errors.len()
            );
            warn!(load_id = %load_id, failed = errors.len(), "Bulk load exceeded failure threshold");
            ctx.state.failure = Some(BulkLoadFailure {
                message: message.clone(),
                errors,
            });
            return StepResult::fatal(message);
        }

        StepResult::success()
    }
}
