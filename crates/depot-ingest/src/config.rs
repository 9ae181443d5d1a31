//! Ingest configuration
//!
//! Tunables for the bulk-load machinery: driver concurrency and polling,
//! failure thresholds, copy retry behavior, and the flight pool size.

use depot_flight::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Default number of sub-flights a driver keeps in flight per bulk job.
pub const DEFAULT_LOAD_CONCURRENT_FILES: usize = 4;

/// Default driver poll-wait between scheduling iterations, in seconds.
pub const DEFAULT_LOAD_DRIVER_WAIT_SECONDS: u64 = 1;

/// Default cap on per-file failures before a bulk load is failed.
/// A value of -1 disables the threshold.
pub const DEFAULT_MAX_FAILED_FILE_LOADS: i64 = 0;

/// Default cap on reported bad control-file lines.
pub const DEFAULT_MAX_BAD_LOAD_FILE_LINE_ERRORS: usize = 5;

/// Default attempts for one object copy before recording a permanent
/// per-item failure.
pub const DEFAULT_COPY_RETRY_ATTEMPTS: u32 = 3;

/// Default fixed delay between copy attempts, in seconds.
pub const DEFAULT_COPY_RETRY_WAIT_SECONDS: u64 = 5;

/// Default size of the bounded copy worker pool (one batch's worth of
/// items is in flight at a time).
pub const DEFAULT_COPY_POOL_SIZE: usize = 8;

/// Default ceiling on concurrently executing flights. Size this to at
/// least `driver jobs + sum(per-job concurrency)` or drivers will starve
/// their own sub-flights.
pub const DEFAULT_MAX_CONCURRENT_FLIGHTS: usize = 16;

/// Default attempts for a retried flight step.
pub const DEFAULT_FLIGHT_RETRY_ATTEMPTS: u32 = 5;

/// Default base delay for flight-step retries, in milliseconds.
pub const DEFAULT_FLIGHT_RETRY_BASE_MS: u64 = 500;

/// Default delay cap for flight-step retries, in milliseconds.
pub const DEFAULT_FLIGHT_RETRY_CAP_MS: u64 = 30_000;

fn default_load_concurrent_files() -> usize {
    DEFAULT_LOAD_CONCURRENT_FILES
}
fn default_load_driver_wait_seconds() -> u64 {
    DEFAULT_LOAD_DRIVER_WAIT_SECONDS
}
fn default_max_failed_file_loads() -> i64 {
    DEFAULT_MAX_FAILED_FILE_LOADS
}
fn default_max_bad_load_file_line_errors() -> usize {
    DEFAULT_MAX_BAD_LOAD_FILE_LINE_ERRORS
}
fn default_copy_retry_attempts() -> u32 {
    DEFAULT_COPY_RETRY_ATTEMPTS
}
fn default_copy_retry_wait_seconds() -> u64 {
    DEFAULT_COPY_RETRY_WAIT_SECONDS
}
fn default_copy_pool_size() -> usize {
    DEFAULT_COPY_POOL_SIZE
}
fn default_max_concurrent_flights() -> usize {
    DEFAULT_MAX_CONCURRENT_FLIGHTS
}
fn default_flight_retry_attempts() -> u32 {
    DEFAULT_FLIGHT_RETRY_ATTEMPTS
}
fn default_flight_retry_base_ms() -> u64 {
    DEFAULT_FLIGHT_RETRY_BASE_MS
}
fn default_flight_retry_cap_ms() -> u64 {
    DEFAULT_FLIGHT_RETRY_CAP_MS
}

/// Main ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum simultaneous sub-flights per bulk job
    pub load_concurrent_files: usize,
    /// Seconds the driver sleeps between polling iterations
    pub load_driver_wait_seconds: u64,
    /// Per-file failures tolerated before the job is failed (-1 = unlimited)
    pub max_failed_file_loads: i64,
    /// Maximum bad control-file lines collected into an error report
    pub max_bad_load_file_line_errors: usize,
    /// Attempts per object copy before a permanent per-item failure
    pub copy_retry_attempts: u32,
    /// Fixed delay between copy attempts, in seconds
    pub copy_retry_wait_seconds: u64,
    /// Bounded copy worker-pool size
    pub copy_pool_size: usize,
    /// Flight pool ceiling shared by drivers and their sub-flights
    pub max_concurrent_flights: usize,
    /// Attempts for retried flight steps
    pub flight_retry_attempts: u32,
    /// Base delay for flight-step retries, in milliseconds
    pub flight_retry_base_ms: u64,
    /// Delay cap for flight-step retries, in milliseconds
    pub flight_retry_cap_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            load_concurrent_files: default_load_concurrent_files(),
            load_driver_wait_seconds: default_load_driver_wait_seconds(),
            max_failed_file_loads: default_max_failed_file_loads(),
            max_bad_load_file_line_errors: default_max_bad_load_file_line_errors(),
            copy_retry_attempts: default_copy_retry_attempts(),
            copy_retry_wait_seconds: default_copy_retry_wait_seconds(),
            copy_pool_size: default_copy_pool_size(),
            max_concurrent_flights: default_max_concurrent_flights(),
            flight_retry_attempts: default_flight_retry_attempts(),
            flight_retry_base_ms: default_flight_retry_base_ms(),
            flight_retry_cap_ms: default_flight_retry_cap_ms(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from the environment.
    ///
    /// Every field can be overridden with a `DEPOT_`-prefixed variable,
    /// e.g. `DEPOT_LOAD_CONCURRENT_FILES=8`. A `.env` file is honored when
    /// present.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("DEPOT").try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Driver poll-wait as a `Duration`.
    pub fn driver_wait(&self) -> Duration {
        Duration::from_secs(self.load_driver_wait_seconds)
    }

    /// Fixed delay between copy attempts as a `Duration`.
    pub fn copy_retry_wait(&self) -> Duration {
        Duration::from_secs(self.copy_retry_wait_seconds)
    }

    /// Retry policy attached to flight steps that touch shared
    /// infrastructure.
    pub fn flight_retry(&self) -> RetryPolicy {
        RetryPolicy::ExponentialBackoff {
            base_ms: self.flight_retry_base_ms,
            cap_ms: self.flight_retry_cap_ms,
            max_attempts: self.flight_retry_attempts,
        }
    }

    /// Retry policy attached to the copy step of a single-file flight.
    pub fn copy_retry(&self) -> RetryPolicy {
        RetryPolicy::FixedInterval {
            interval_ms: self.copy_retry_wait_seconds * 1000,
            max_attempts: self.copy_retry_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.load_concurrent_files, DEFAULT_LOAD_CONCURRENT_FILES);
        assert_eq!(config.max_failed_file_loads, DEFAULT_MAX_FAILED_FILE_LOADS);
        assert_eq!(config.copy_retry_attempts, DEFAULT_COPY_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_retry_policies_reflect_settings() {
        let config = IngestConfig {
            copy_retry_attempts: 2,
            copy_retry_wait_seconds: 1,
            flight_retry_attempts: 4,
            ..IngestConfig::default()
        };
        assert_eq!(
            config.copy_retry(),
            RetryPolicy::FixedInterval {
                interval_ms: 1000,
                max_attempts: 2
            }
        );
        match config.flight_retry() {
            RetryPolicy::ExponentialBackoff { max_attempts, .. } => assert_eq!(max_attempts, 4),
            other => panic!("unexpected policy: {other:?}"),
        }
    }
}
