//! Durable flight log
//!
//! [`FlightLog`] is the storage contract behind the engine: one record per
//! flight holding the serialized input, the latest persisted working state,
//! the step cursor, and the direction of travel. Every successful step
//! transition overwrites the record, so a restarted process can pick up a
//! flight exactly where the last transition left it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::FlightId;
use crate::error::Result;

/// Direction a flight is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightDirection {
    Doing,
    Undoing,
}

impl FlightDirection {
    pub fn as_str(&self) -> &str {
        match self {
            FlightDirection::Doing => "doing",
            FlightDirection::Undoing => "undoing",
        }
    }
}

impl From<String> for FlightDirection {
    fn from(s: String) -> Self {
        match s.as_str() {
            "undoing" => FlightDirection::Undoing,
            _ => FlightDirection::Doing,
        }
    }
}

/// Lifecycle status of a flight.
///
/// `Error` means the flight failed and its completed steps were undone;
/// `Fatal` means an undo itself failed and manual intervention may be
/// required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    Running,
    Success,
    Error,
    Fatal,
}

impl FlightStatus {
    pub fn as_str(&self) -> &str {
        match self {
            FlightStatus::Running => "running",
            FlightStatus::Success => "success",
            FlightStatus::Error => "error",
            FlightStatus::Fatal => "fatal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlightStatus::Running)
    }
}

impl From<String> for FlightStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "success" => FlightStatus::Success,
            "error" => FlightStatus::Error,
            "fatal" => FlightStatus::Fatal,
            _ => FlightStatus::Running,
        }
    }
}

/// One persisted flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightRecord {
    pub flight_id: FlightId,
    pub flight_type: String,
    pub status: FlightStatus,
    pub direction: FlightDirection,
    pub step_index: i32,
    pub input: serde_json::Value,
    pub state: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlightRecord {
    /// A freshly submitted flight, about to run its first step.
    pub fn new(
        flight_id: FlightId,
        flight_type: impl Into<String>,
        input: serde_json::Value,
        state: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            flight_id,
            flight_type: flight_type.into(),
            status: FlightStatus::Running,
            direction: FlightDirection::Doing,
            step_index: 0,
            input,
            state,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage contract for flight records.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn FlightLog>`.
#[async_trait]
pub trait FlightLog: Send + Sync {
    /// Insert a new flight record.
    ///
    /// # Errors
    ///
    /// Returns [`FlightError::DuplicateFlight`](crate::FlightError) when a
    /// record with the same id already exists.
    async fn create(&self, record: &FlightRecord) -> Result<()>;

    /// Persist a step transition: the new working state, step cursor, and
    /// direction, plus the failure cause once one exists. The write must be
    /// atomic so a crash never splits state from cursor.
    async fn record_transition(
        &self,
        flight_id: &FlightId,
        step_index: i32,
        direction: FlightDirection,
        state: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()>;

    /// Mark a flight terminal with its final state.
    async fn complete(
        &self,
        flight_id: &FlightId,
        status: FlightStatus,
        state: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()>;

    /// Fetch a flight record.
    ///
    /// # Errors
    ///
    /// Returns [`FlightError::UnknownFlight`](crate::FlightError) when no
    /// record exists. Callers rely on that distinction for orphan
    /// detection.
    async fn get(&self, flight_id: &FlightId) -> Result<FlightRecord>;

    /// Remove a terminal flight once its result has been consumed.
    async fn delete(&self, flight_id: &FlightId) -> Result<()>;
}
