//! Flight assembly and execution
//!
//! A [`Flight`] is an ordered list of (step, retry policy) pairs executed
//! as one durable, compensable transaction. Execution runs forward until
//! every step succeeds, or flips to undoing and compensates completed
//! steps in strict reverse order. Every transition is persisted before the
//! engine moves on, so a crash at any point leaves the flight resumable
//! from the last persisted state.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::FlightContext;
use crate::log::{FlightDirection, FlightLog, FlightStatus};
use crate::retry::RetryPolicy;
use crate::step::{Step, StepResult, StepStatus};

struct StepEntry<I, S> {
    step: Box<dyn Step<I, S>>,
    retry: RetryPolicy,
}

/// Execution cursor, mirrored into the flight log at every transition.
#[derive(Debug, Clone)]
pub struct FlightProgress {
    pub step_index: i32,
    pub direction: FlightDirection,
    pub error: Option<String>,
}

impl FlightProgress {
    /// Cursor for a freshly submitted flight.
    pub fn start() -> Self {
        Self {
            step_index: 0,
            direction: FlightDirection::Doing,
            error: None,
        }
    }
}

/// An ordered, compensable series of steps.
pub struct Flight<I, S> {
    flight_type: String,
    steps: Vec<StepEntry<I, S>>,
}

impl<I, S> Flight<I, S>
where
    I: Send + Sync,
    S: Send + Sync,
{
    pub fn new(flight_type: impl Into<String>) -> Self {
        Self {
            flight_type: flight_type.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step with no retry policy.
    pub fn step(self, step: impl Step<I, S> + 'static) -> Self {
        self.step_with_retry(step, RetryPolicy::None)
    }

    /// Append a step with a retry policy for its transient failures.
    pub fn step_with_retry(mut self, step: impl Step<I, S> + 'static, retry: RetryPolicy) -> Self {
        self.steps.push(StepEntry {
            step: Box::new(step),
            retry,
        });
        self
    }

    pub fn flight_type(&self) -> &str {
        &self.flight_type
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

impl<I, S> Flight<I, S>
where
    I: Send + Sync,
    S: Serialize + Send + Sync,
{
    /// Execute from the given cursor until terminal, persisting every
    /// transition. May be entered in either direction (a resumed flight
    /// picks up exactly where the persisted cursor points).
    pub(crate) async fn fly(
        &self,
        ctx: &mut FlightContext<I, S>,
        mut progress: FlightProgress,
        log: &dyn FlightLog,
    ) -> crate::error::Result<FlightStatus> {
        if progress.direction == FlightDirection::Doing {
            loop {
                if progress.step_index as usize >= self.steps.len() {
                    let state = serde_json::to_value(&ctx.state)?;
                    log.complete(&ctx.flight_id, FlightStatus::Success, &state, None)
                        .await?;
                    return Ok(FlightStatus::Success);
                }

                let entry = &self.steps[progress.step_index as usize];
                let result = self
                    .attempt_with_retry(entry, ctx, FlightDirection::Doing)
                    .await;

                let state = serde_json::to_value(&ctx.state)?;
                if result.is_success() {
                    progress.step_index += 1;
                    log.record_transition(
                        &ctx.flight_id,
                        progress.step_index,
                        FlightDirection::Doing,
                        &state,
                        None,
                    )
                    .await?;
                } else {
                    // Remember the failure that sent us backward; that is
                    // what the flight ultimately reports.
                    progress.error = result
                        .cause
                        .clone()
                        .or_else(|| Some(format!("step {} failed", entry.step.name())));
                    progress.direction = FlightDirection::Undoing;
                    warn!(
                        flight_id = %ctx.flight_id,
                        step = entry.step.name(),
                        error = progress.error.as_deref().unwrap_or_default(),
                        "Step failed, undoing completed steps"
                    );
                    log.record_transition(
                        &ctx.flight_id,
                        progress.step_index,
                        FlightDirection::Undoing,
                        &state,
                        progress.error.as_deref(),
                    )
                    .await?;
                    break;
                }
            }
        }

        // Undoing: compensate from the current step back to the first.
        // The step at the cursor is undone too; its run may have partially
        // applied before failing.
        loop {
            if self.steps.is_empty() || progress.step_index < 0 {
                break;
            }
            let entry = &self.steps[progress.step_index as usize];
            let result = self
                .attempt_with_retry(entry, ctx, FlightDirection::Undoing)
                .await;

            let state = serde_json::to_value(&ctx.state)?;
            if result.is_success() {
                if progress.step_index == 0 {
                    break;
                }
                progress.step_index -= 1;
                log.record_transition(
                    &ctx.flight_id,
                    progress.step_index,
                    FlightDirection::Undoing,
                    &state,
                    progress.error.as_deref(),
                )
                .await?;
            } else {
                // Dismal failure: the undo itself failed.
                let undo_cause = result.cause.unwrap_or_else(|| "unknown undo failure".into());
                let combined = match &progress.error {
                    Some(original) => format!("{original}; undo failed: {undo_cause}"),
                    None => format!("undo failed: {undo_cause}"),
                };
                warn!(
                    flight_id = %ctx.flight_id,
                    step = entry.step.name(),
                    error = %combined,
                    "Undo failed, flight is fatal"
                );
                log.complete(&ctx.flight_id, FlightStatus::Fatal, &state, Some(&combined))
                    .await?;
                return Ok(FlightStatus::Fatal);
            }
        }

        let state = serde_json::to_value(&ctx.state)?;
        log.complete(
            &ctx.flight_id,
            FlightStatus::Error,
            &state,
            progress.error.as_deref(),
        )
        .await?;
        Ok(FlightStatus::Error)
    }

    /// Invoke one step (run or undo) under its retry policy. Exhausting
    /// the policy converts the last transient failure into a fatal one.
    async fn attempt_with_retry(
        &self,
        entry: &StepEntry<I, S>,
        ctx: &mut FlightContext<I, S>,
        direction: FlightDirection,
    ) -> StepResult {
        let mut attempt = 1u32;
        loop {
            debug!(
                flight_id = %ctx.flight_id,
                step = entry.step.name(),
                direction = direction.as_str(),
                attempt,
                "Executing step"
            );
            let result = match direction {
                FlightDirection::Doing => entry.step.run(ctx).await,
                FlightDirection::Undoing => entry.step.undo(ctx).await,
            };

            match result.status {
                StepStatus::Success | StepStatus::FailureFatal => return result,
                StepStatus::FailureRetry => {
                    attempt += 1;
                    match entry.retry.delay_before_attempt(attempt) {
                        Some(delay) => {
                            info!(
                                flight_id = %ctx.flight_id,
                                step = entry.step.name(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Retrying step"
                            );
                            tokio::time::sleep(delay).await;
                        },
                        None => {
                            return StepResult {
                                status: StepStatus::FailureFatal,
                                cause: result.cause.or_else(|| {
                                    Some(format!("step {} retries exhausted", entry.step.name()))
                                }),
                            };
                        },
                    }
                },
            }
        }
    }
}
