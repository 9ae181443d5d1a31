//! Postgres-backed load bookkeeping store
//!
//! The load-tag lock relies on per-statement atomicity: the conditional
//! `UPDATE ... RETURNING` either takes the lock or proves another flight
//! holds it, with no window in between.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::store::LoadStore;
use super::{
    BulkFileResult, Load, LoadCandidates, LoadError, LoadFile, LoadFileSpec, LoadFileState,
    LoadStateCounts, Result,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS load (
    load_id            UUID PRIMARY KEY,
    load_tag           TEXT NOT NULL UNIQUE,
    locking_flight_id  TEXT
);

CREATE TABLE IF NOT EXISTS load_file (
    load_id     UUID NOT NULL,
    source_path TEXT NOT NULL,
    target_path TEXT NOT NULL,
    mime_type   TEXT,
    description TEXT,
    state       TEXT NOT NULL,
    flight_id   TEXT,
    file_id     UUID,
    error       TEXT,
    PRIMARY KEY (load_id, target_path)
)
"#;

/// Bookkeeping store in two Postgres tables.
pub struct PgLoadStore {
    pool: PgPool,
}

impl PgLoadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing tables when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    fn file_from_row(row: &PgRow) -> std::result::Result<LoadFile, sqlx::Error> {
        Ok(LoadFile {
            load_id: row.try_get("load_id")?,
            source_path: row.try_get("source_path")?,
            target_path: row.try_get("target_path")?,
            mime_type: row.try_get("mime_type")?,
            description: row.try_get("description")?,
            state: LoadFileState::from(row.try_get::<String, _>("state")?),
            flight_id: row.try_get("flight_id")?,
            file_id: row.try_get("file_id")?,
            error: row.try_get("error")?,
        })
    }

    async fn files_by_state(
        &self,
        load_id: Uuid,
        state: LoadFileState,
        limit: Option<i64>,
    ) -> Result<Vec<LoadFile>> {
        let mut sql = String::from(
            "SELECT * FROM load_file WHERE load_id = $1 AND state = $2 ORDER BY target_path",
        );
        if limit.is_some() {
            sql.push_str(" LIMIT $3");
        }
        let mut query = sqlx::query(&sql).bind(load_id).bind(state.as_str());
        if let Some(limit) = limit {
            query = query.bind(limit);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| Self::file_from_row(r).map_err(LoadError::from))
            .collect()
    }

    async fn update_file(
        &self,
        load_id: Uuid,
        target_path: &str,
        state: LoadFileState,
        flight_id: Option<&str>,
        file_id: Option<Uuid>,
        error: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE load_file
            SET state = $1, flight_id = $2, file_id = $3, error = $4
            WHERE load_id = $5 AND target_path = $6
            "#,
        )
        .bind(state.as_str())
        .bind(flight_id)
        .bind(file_id)
        .bind(error)
        .bind(load_id)
        .bind(target_path)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(LoadError::CorruptState(format!(
                "no row for {load_id}:{target_path}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LoadStore for PgLoadStore {
    async fn lock_load(&self, load_tag: &str, flight_id: &str) -> Result<Load> {
        sqlx::query(
            r#"
            INSERT INTO load (load_id, load_tag, locking_flight_id)
            VALUES ($1, $2, NULL)
            ON CONFLICT (load_tag) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(load_tag)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            r#"
            UPDATE load
            SET locking_flight_id = $2
            WHERE load_tag = $1
              AND (locking_flight_id IS NULL OR locking_flight_id = $2)
            RETURNING load_id, load_tag, locking_flight_id
            "#,
        )
        .bind(load_tag)
        .bind(flight_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Load {
                load_id: row.try_get("load_id").map_err(LoadError::from)?,
                load_tag: row.try_get("load_tag").map_err(LoadError::from)?,
                locking_flight_id: row.try_get("locking_flight_id").map_err(LoadError::from)?,
            });
        }

        let holder: Option<String> =
            sqlx::query_scalar("SELECT locking_flight_id FROM load WHERE load_tag = $1")
                .bind(load_tag)
                .fetch_one(&self.pool)
                .await?;
        Err(LoadError::LoadLocked {
            load_tag: load_tag.to_string(),
            locking_flight_id: holder.unwrap_or_default(),
        })
    }

    async fn unlock_load(&self, load_tag: &str, flight_id: &str) -> Result<()> {
        let unlocked = sqlx::query(
            r#"
            UPDATE load
            SET locking_flight_id = NULL
            WHERE load_tag = $1
              AND (locking_flight_id IS NULL OR locking_flight_id = $2)
            "#,
        )
        .bind(load_tag)
        .bind(flight_id)
        .execute(&self.pool)
        .await?;

        if unlocked.rows_affected() > 0 {
            return Ok(());
        }
        // Nothing to unlock is fine; a lock held by someone else is not.
        let holder: Option<Option<String>> =
            sqlx::query_scalar("SELECT locking_flight_id FROM load WHERE load_tag = $1")
                .bind(load_tag)
                .fetch_optional(&self.pool)
                .await?;
        match holder.flatten() {
            Some(holder) => Err(LoadError::LoadLocked {
                load_tag: load_tag.to_string(),
                locking_flight_id: holder,
            }),
            None => Ok(()),
        }
    }

    async fn populate_files(&self, load_id: Uuid, files: &[LoadFileSpec]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for spec in files {
            if !seen.insert(spec.target_path.as_str()) {
                return Err(LoadError::DuplicateTargetPath(spec.target_path.clone()));
            }
        }

        let mut tx = self.pool.begin().await?;
        for spec in files {
            sqlx::query(
                r#"
                INSERT INTO load_file
                    (load_id, source_path, target_path, mime_type, description, state)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (load_id, target_path) DO NOTHING
                "#,
            )
            .bind(load_id)
            .bind(&spec.source_path)
            .bind(&spec.target_path)
            .bind(&spec.mime_type)
            .bind(&spec.description)
            .bind(LoadFileState::NotTried.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clean_files(&self, load_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM load_file WHERE load_id = $1")
            .bind(load_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_candidates(
        &self,
        load_id: Uuid,
        candidate_limit: usize,
    ) -> Result<LoadCandidates> {
        let failed: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM load_file WHERE load_id = $1 AND state = $2",
        )
        .bind(load_id)
        .bind(LoadFileState::Failed.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(LoadCandidates {
            failed_loads: failed,
            running_loads: self
                .files_by_state(load_id, LoadFileState::Running, None)
                .await?,
            candidate_files: self
                .files_by_state(
                    load_id,
                    LoadFileState::NotTried,
                    // An unbounded request must not wrap into a negative LIMIT.
                    Some(candidate_limit.min(i64::MAX as usize) as i64),
                )
                .await?,
        })
    }

    async fn find_running(&self, load_id: Uuid) -> Result<Vec<LoadFile>> {
        self.files_by_state(load_id, LoadFileState::Running, None)
            .await
    }

    async fn find_failed(&self, load_id: Uuid, limit: usize) -> Result<Vec<LoadFile>> {
        self.files_by_state(
            load_id,
            LoadFileState::Failed,
            Some(limit.min(i64::MAX as usize) as i64),
        )
        .await
    }

    async fn set_not_tried(&self, load_id: Uuid, target_path: &str) -> Result<()> {
        self.update_file(load_id, target_path, LoadFileState::NotTried, None, None, None)
            .await
    }

    async fn set_running(&self, load_id: Uuid, target_path: &str, flight_id: &str) -> Result<()> {
        self.update_file(
            load_id,
            target_path,
            LoadFileState::Running,
            Some(flight_id),
            None,
            None,
        )
        .await
    }

    async fn set_succeeded(&self, load_id: Uuid, target_path: &str, file_id: Uuid) -> Result<()> {
        self.update_file(
            load_id,
            target_path,
            LoadFileState::Succeeded,
            None,
            Some(file_id),
            None,
        )
        .await
    }

    async fn set_failed(&self, load_id: Uuid, target_path: &str, error: &str) -> Result<()> {
        self.update_file(
            load_id,
            target_path,
            LoadFileState::Failed,
            None,
            None,
            Some(error),
        )
        .await
    }

    async fn state_counts(&self, load_id: Uuid) -> Result<LoadStateCounts> {
        let rows = sqlx::query(
            "SELECT state, count(*) AS statecount FROM load_file WHERE load_id = $1 GROUP BY state",
        )
        .bind(load_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = LoadStateCounts::default();
        for row in rows {
            let count: i64 = row.try_get("statecount").map_err(LoadError::from)?;
            let state = LoadFileState::from(row.try_get::<String, _>("state").map_err(LoadError::from)?);
            counts.total_files += count;
            match state {
                LoadFileState::Running => {
                    return Err(LoadError::CorruptState(
                        "no rows may be running when results are computed".to_string(),
                    ));
                },
                LoadFileState::Succeeded => counts.succeeded_files += count,
                LoadFileState::Failed => counts.failed_files += count,
                LoadFileState::NotTried => counts.not_tried_files += count,
            }
        }
        Ok(counts)
    }

    async fn file_results(&self, load_id: Uuid) -> Result<Vec<BulkFileResult>> {
        let rows = sqlx::query(
            r#"
            SELECT source_path, target_path, state, file_id, error
            FROM load_file WHERE load_id = $1 ORDER BY target_path
            "#,
        )
        .bind(load_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<BulkFileResult> {
                Ok(BulkFileResult {
                    source_path: row.try_get("source_path").map_err(LoadError::from)?,
                    target_path: row.try_get("target_path").map_err(LoadError::from)?,
                    state: LoadFileState::from(
                        row.try_get::<String, _>("state").map_err(LoadError::from)?,
                    ),
                    file_id: row.try_get("file_id").map_err(LoadError::from)?,
                    error: row.try_get("error").map_err(LoadError::from)?,
                })
            })
            .collect()
    }
}
