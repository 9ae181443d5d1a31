//! Flight identity and execution context

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque flight identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightId(String);

impl FlightId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random flight id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlightId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for FlightId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Everything a step may touch while executing.
///
/// `input` is set when the flight is created and never mutated; `state` is
/// the flight's working state, serialized and persisted by the engine after
/// every successful step transition. Both must round-trip through JSON so a
/// resumed flight sees exactly what the crashed one had persisted.
pub struct FlightContext<I, S> {
    pub flight_id: FlightId,
    pub input: I,
    pub state: S,
}

impl<I, S> FlightContext<I, S> {
    pub fn new(flight_id: FlightId, input: I, state: S) -> Self {
        Self {
            flight_id,
            input,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_id_roundtrip() {
        let id = FlightId::new("f-123");
        assert_eq!(id.as_str(), "f-123");
        assert_eq!(id.to_string(), "f-123");
        assert_eq!(FlightId::from("f-123"), id);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(FlightId::generate(), FlightId::generate());
    }
}
