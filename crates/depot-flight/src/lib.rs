//! Depot Flight Engine
//!
//! A durable, compensable saga engine: flights are ordered lists of
//! idempotent steps with per-step retry policies. Working state is
//! persisted after every transition, so flights survive process restarts
//! and resume by re-invoking the current step.
//!
//! # Overview
//!
//! - [`Step`] / [`StepResult`]: the unit-of-work contract
//! - [`Flight`]: ordered (step, retry policy) pairs
//! - [`FlightContext`]: typed input + working state, serialized only at
//!   the durability boundary
//! - [`FlightLog`]: the durable record store ([`MemoryFlightLog`],
//!   [`PgFlightLog`])
//! - [`FlightRunner`]: bounded execution pool with submit / status /
//!   resume, raising [`FlightError::UnknownFlight`] for ids it has never
//!   seen
//!
//! # Example
//!
//! ```rust,ignore
//! let log = Arc::new(MemoryFlightLog::new());
//! let runner = FlightRunner::new(log, 8);
//!
//! let flight = Flight::new("file-load")
//!     .step(CreateEntryStep::new(catalog.clone()))
//!     .step_with_retry(CopyStep::new(store.clone()), RetryPolicy::FixedInterval {
//!         interval_ms: 500,
//!         max_attempts: 3,
//!     });
//!
//! let flight_id = runner.create_flight_id();
//! runner.submit(&flight_id, flight, input, State::default()).await?;
//! let state = runner.wait(&flight_id, Duration::from_millis(50)).await?;
//! ```

pub mod context;
pub mod error;
pub mod flight;
pub mod log;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod runner;
pub mod step;

pub use context::{FlightContext, FlightId};
pub use error::{FlightError, Result};
pub use flight::Flight;
pub use log::{FlightDirection, FlightLog, FlightRecord, FlightStatus};
pub use memory::MemoryFlightLog;
pub use postgres::PgFlightLog;
pub use retry::RetryPolicy;
pub use runner::{FlightRunner, FlightState};
pub use step::{Step, StepResult, StepStatus};
