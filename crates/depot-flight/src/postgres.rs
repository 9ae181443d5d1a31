//! Postgres-backed flight log

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::context::FlightId;
use crate::error::{FlightError, Result};
use crate::log::{FlightDirection, FlightLog, FlightRecord, FlightStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flight (
    flight_id   TEXT PRIMARY KEY,
    flight_type TEXT NOT NULL,
    status      TEXT NOT NULL,
    direction   TEXT NOT NULL,
    step_index  INTEGER NOT NULL,
    input       JSONB NOT NULL,
    state       JSONB NOT NULL,
    error       TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Durable flight log in a Postgres table.
pub struct PgFlightLog {
    pool: PgPool,
}

impl PgFlightLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn record_from_row(row: &PgRow) -> std::result::Result<FlightRecord, sqlx::Error> {
        Ok(FlightRecord {
            flight_id: FlightId::new(row.try_get::<String, _>("flight_id")?),
            flight_type: row.try_get("flight_type")?,
            status: FlightStatus::from(row.try_get::<String, _>("status")?),
            direction: FlightDirection::from(row.try_get::<String, _>("direction")?),
            step_index: row.try_get("step_index")?,
            input: row.try_get("input")?,
            state: row.try_get("state")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl FlightLog for PgFlightLog {
    async fn create(&self, record: &FlightRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO flight
                (flight_id, flight_type, status, direction, step_index, input, state, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.flight_id.as_str())
        .bind(&record.flight_type)
        .bind(record.status.as_str())
        .bind(record.direction.as_str())
        .bind(record.step_index)
        .bind(&record.input)
        .bind(&record.state)
        .bind(&record.error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(FlightError::DuplicateFlight(record.flight_id.clone()))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn record_transition(
        &self,
        flight_id: &FlightId,
        step_index: i32,
        direction: FlightDirection,
        state: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE flight
            SET step_index = $1,
                direction = $2,
                state = $3,
                error = COALESCE($4, error),
                updated_at = NOW()
            WHERE flight_id = $5
            "#,
        )
        .bind(step_index)
        .bind(direction.as_str())
        .bind(state)
        .bind(error)
        .bind(flight_id.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(FlightError::UnknownFlight(flight_id.clone()));
        }
        Ok(())
    }

    async fn complete(
        &self,
        flight_id: &FlightId,
        status: FlightStatus,
        state: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE flight
            SET status = $1,
                state = $2,
                error = COALESCE($3, error),
                updated_at = NOW()
            WHERE flight_id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(state)
        .bind(error)
        .bind(flight_id.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(FlightError::UnknownFlight(flight_id.clone()));
        }
        Ok(())
    }

    async fn get(&self, flight_id: &FlightId) -> Result<FlightRecord> {
        let row = sqlx::query("SELECT * FROM flight WHERE flight_id = $1")
            .bind(flight_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Self::record_from_row(&row)?),
            None => Err(FlightError::UnknownFlight(flight_id.clone())),
        }
    }

    async fn delete(&self, flight_id: &FlightId) -> Result<()> {
        sqlx::query("DELETE FROM flight WHERE flight_id = $1")
            .bind(flight_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
