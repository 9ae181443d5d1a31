//! In-memory flight log
//!
//! Backs tests and single-process embeddings. State-handling semantics
//! match the Postgres log: transitions overwrite the record atomically.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::context::FlightId;
use crate::error::{FlightError, Result};
use crate::log::{FlightDirection, FlightLog, FlightRecord, FlightStatus};

/// Flight log held in a process-local map.
#[derive(Default)]
pub struct MemoryFlightLog {
    records: RwLock<HashMap<FlightId, FlightRecord>>,
}

impl MemoryFlightLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held (terminal included).
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl FlightLog for MemoryFlightLog {
    async fn create(&self, record: &FlightRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.flight_id) {
            return Err(FlightError::DuplicateFlight(record.flight_id.clone()));
        }
        records.insert(record.flight_id.clone(), record.clone());
        Ok(())
    }

    async fn record_transition(
        &self,
        flight_id: &FlightId,
        step_index: i32,
        direction: FlightDirection,
        state: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(flight_id)
            .ok_or_else(|| FlightError::UnknownFlight(flight_id.clone()))?;
        record.step_index = step_index;
        record.direction = direction;
        record.state = state.clone();
        if let Some(error) = error {
            record.error = Some(error.to_string());
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(
        &self,
        flight_id: &FlightId,
        status: FlightStatus,
        state: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(flight_id)
            .ok_or_else(|| FlightError::UnknownFlight(flight_id.clone()))?;
        record.status = status;
        record.state = state.clone();
        record.error = error.map(str::to_string).or(record.error.take());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, flight_id: &FlightId) -> Result<FlightRecord> {
        self.records
            .read()
            .await
            .get(flight_id)
            .cloned()
            .ok_or_else(|| FlightError::UnknownFlight(flight_id.clone()))
    }

    async fn delete(&self, flight_id: &FlightId) -> Result<()> {
        self.records.write().await.remove(flight_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> FlightRecord {
        FlightRecord::new(
            FlightId::new(id),
            "test-flight",
            serde_json::json!({}),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let log = MemoryFlightLog::new();
        log.create(&record("f1")).await.unwrap();
        let err = log.create(&record("f1")).await.unwrap_err();
        assert!(matches!(err, FlightError::DuplicateFlight(_)));
    }

    #[tokio::test]
    async fn test_get_unknown_flight() {
        let log = MemoryFlightLog::new();
        let err = log.get(&FlightId::new("missing")).await.unwrap_err();
        assert!(matches!(err, FlightError::UnknownFlight(_)));
    }

    #[tokio::test]
    async fn test_transition_updates_cursor_and_state() {
        let log = MemoryFlightLog::new();
        log.create(&record("f1")).await.unwrap();
        log.record_transition(
            &FlightId::new("f1"),
            2,
            FlightDirection::Undoing,
            &serde_json::json!({"copied": true}),
            Some("boom"),
        )
        .await
        .unwrap();

        let stored = log.get(&FlightId::new("f1")).await.unwrap();
        assert_eq!(stored.step_index, 2);
        assert_eq!(stored.direction, FlightDirection::Undoing);
        assert_eq!(stored.state["copied"], serde_json::json!(true));
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_complete_preserves_earlier_error() {
        let log = MemoryFlightLog::new();
        log.create(&record("f1")).await.unwrap();
        log.record_transition(
            &FlightId::new("f1"),
            1,
            FlightDirection::Undoing,
            &serde_json::json!({}),
            Some("original failure"),
        )
        .await
        .unwrap();
        log.complete(
            &FlightId::new("f1"),
            FlightStatus::Error,
            &serde_json::json!({}),
            None,
        )
        .await
        .unwrap();

        let stored = log.get(&FlightId::new("f1")).await.unwrap();
        assert_eq!(stored.status, FlightStatus::Error);
        assert_eq!(stored.error.as_deref(), Some("original failure"));
    }
}
