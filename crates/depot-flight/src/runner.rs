//! Flight runner
//!
//! The runner is the execution engine: it accepts flights, runs them on a
//! bounded pool of tokio tasks, and answers authoritative status queries
//! from the durable log. Within one flight, steps execute strictly
//! sequentially; across flights, at most `max_concurrent_flights` run at a
//! time.
//!
//! Pool sizing: a driver step occupies one slot for the lifetime of its
//! bulk job while the sub-flights it launches take further slots, so size
//! the pool to at least `driver jobs + sum(per-job concurrency limits)` or
//! the driver will starve its own children.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::context::{FlightContext, FlightId};
use crate::error::{FlightError, Result};
use crate::flight::{Flight, FlightProgress};
use crate::log::{FlightLog, FlightRecord, FlightStatus};

/// Authoritative view of one flight, as reported by the runner.
#[derive(Debug, Clone)]
pub struct FlightState {
    pub flight_id: FlightId,
    pub status: FlightStatus,
    /// Final working state, present once the flight is terminal. A
    /// successful flight's results are read out of this value.
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl FlightState {
    /// Deserialize the terminal working state into a typed result.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .result
            .clone()
            .ok_or_else(|| FlightError::StillRunning(self.flight_id.clone()))?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Bounded executor for flights backed by a durable log.
pub struct FlightRunner {
    log: Arc<dyn FlightLog>,
    permits: Arc<Semaphore>,
}

impl FlightRunner {
    pub fn new(log: Arc<dyn FlightLog>, max_concurrent_flights: usize) -> Arc<Self> {
        Arc::new(Self {
            log,
            permits: Arc::new(Semaphore::new(max_concurrent_flights)),
        })
    }

    /// Mint a flight id for a submission the caller wants to record
    /// elsewhere before the flight exists.
    pub fn create_flight_id(&self) -> FlightId {
        FlightId::generate()
    }

    /// Submit a flight for execution.
    ///
    /// The flight record is persisted before the execution task is
    /// spawned; a process death after this call returns leaves a record
    /// the runner recognizes, so callers that persisted the id beforehand
    /// can distinguish "submitted but interrupted" from "never submitted".
    pub async fn submit<I, S>(
        self: &Arc<Self>,
        flight_id: &FlightId,
        flight: Flight<I, S>,
        input: I,
        state: S,
    ) -> Result<()>
    where
        I: Serialize + Send + Sync + 'static,
        S: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let record = FlightRecord::new(
            flight_id.clone(),
            flight.flight_type(),
            serde_json::to_value(&input)?,
            serde_json::to_value(&state)?,
        );
        self.log.create(&record).await?;

        let ctx = FlightContext::new(flight_id.clone(), input, state);
        self.spawn(flight, ctx, FlightProgress::start());
        Ok(())
    }

    /// Resume a flight from its persisted cursor, re-invoking the current
    /// step. The caller rebuilds the flight the same way it was originally
    /// constructed; the input and working state come from the log. Returns
    /// `false` when the flight is already terminal.
    pub async fn resume<I, S>(
        self: &Arc<Self>,
        flight_id: &FlightId,
        flight: Flight<I, S>,
    ) -> Result<bool>
    where
        I: Serialize + DeserializeOwned + Send + Sync + 'static,
        S: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let record = self.log.get(flight_id).await?;
        if record.status.is_terminal() {
            return Ok(false);
        }

        let input: I = serde_json::from_value(record.input)?;
        let state: S = serde_json::from_value(record.state)?;
        let ctx = FlightContext::new(flight_id.clone(), input, state);
        let progress = FlightProgress {
            step_index: record.step_index,
            direction: record.direction,
            error: record.error,
        };
        self.spawn(flight, ctx, progress);
        Ok(true)
    }

    /// Authoritative status of a flight.
    ///
    /// # Errors
    ///
    /// Returns [`FlightError::UnknownFlight`] when the runner has no record
    /// of the id; the ingest driver uses this to detect orphans.
    pub async fn status(&self, flight_id: &FlightId) -> Result<FlightState> {
        let record = self.log.get(flight_id).await?;
        Ok(FlightState {
            flight_id: record.flight_id,
            result: record.status.is_terminal().then_some(record.state),
            status: record.status,
            error: record.error,
        })
    }

    /// Poll until the flight reaches a terminal state.
    pub async fn wait(&self, flight_id: &FlightId, poll_interval: Duration) -> Result<FlightState> {
        loop {
            let state = self.status(flight_id).await?;
            if state.status.is_terminal() {
                return Ok(state);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Remove a terminal flight's record once its result is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`FlightError::StillRunning`] for a flight that has not
    /// finished.
    pub async fn delete(&self, flight_id: &FlightId) -> Result<()> {
        let record = self.log.get(flight_id).await?;
        if !record.status.is_terminal() {
            return Err(FlightError::StillRunning(flight_id.clone()));
        }
        self.log.delete(flight_id).await
    }

    fn spawn<I, S>(self: &Arc<Self>, flight: Flight<I, S>, mut ctx: FlightContext<I, S>, progress: FlightProgress)
    where
        I: Send + Sync + 'static,
        S: Serialize + Send + Sync + 'static,
    {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_permit) = runner.permits.acquire().await else {
                return;
            };
            let flight_id = ctx.flight_id.clone();
            match flight.fly(&mut ctx, progress, runner.log.as_ref()).await {
                Ok(status) => {
                    debug!(flight_id = %flight_id, status = status.as_str(), "Flight finished");
                },
                Err(e) => {
                    // The engine itself failed (log unreachable, state not
                    // serializable). Mark the flight fatal, best effort.
                    error!(flight_id = %flight_id, error = %e, "Flight execution aborted");
                    let state = serde_json::to_value(&ctx.state).unwrap_or(serde_json::Value::Null);
                    let _ = runner
                        .log
                        .complete(&flight_id, FlightStatus::Fatal, &state, Some(&e.to_string()))
                        .await;
                },
            }
        });
    }
}
