//! Flight engine errors

use thiserror::Error;

use crate::FlightId;

/// Result type alias for flight engine operations
pub type Result<T> = std::result::Result<T, FlightError>;

/// Errors raised by the flight engine and its durable log.
#[derive(Error, Debug)]
pub enum FlightError {
    /// The flight id has never been recorded by the engine. Callers use
    /// this to detect orphaned bookkeeping rows.
    #[error("Flight not found: {0}")]
    UnknownFlight(FlightId),

    #[error("Flight already exists: {0}")]
    DuplicateFlight(FlightId),

    #[error("Flight {0} has not reached a terminal state")]
    StillRunning(FlightId),

    #[error("Flight log operation failed: {0}")]
    Log(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid step index {index} in flight {flight_id}")]
    InvalidStepIndex { flight_id: FlightId, index: i32 },
}

impl From<sqlx::Error> for FlightError {
    fn from(e: sqlx::Error) -> Self {
        FlightError::Log(e.to_string())
    }
}
