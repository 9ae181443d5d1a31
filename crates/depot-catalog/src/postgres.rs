//! Postgres-backed metadata store
//!
//! Documents are stored as JSONB rows keyed by (collection, document
//! name), where the document name is the encoded lookup path. Uniqueness
//! of (path, name) within a collection therefore falls out of the primary
//! key, and insert-if-absent maps onto `ON CONFLICT DO NOTHING`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::entry::{DirectoryEntry, FileMetadata};
use crate::error::{CatalogError, Result};
use crate::paths;
use crate::store::{MetadataStore, UpsertOutcome};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS catalog_entry (
    collection_id UUID NOT NULL,
    doc_name      TEXT NOT NULL,
    file_id       UUID NOT NULL,
    dir_path      TEXT NOT NULL,
    entry         JSONB NOT NULL,
    PRIMARY KEY (collection_id, doc_name)
);
CREATE INDEX IF NOT EXISTS catalog_entry_file_id_idx
    ON catalog_entry (collection_id, file_id);
CREATE INDEX IF NOT EXISTS catalog_entry_dir_path_idx
    ON catalog_entry (collection_id, dir_path);

CREATE TABLE IF NOT EXISTS catalog_file (
    collection_id UUID NOT NULL,
    file_id       UUID NOT NULL,
    metadata      JSONB NOT NULL,
    PRIMARY KEY (collection_id, file_id)
)
"#;

/// Metadata store in two Postgres tables.
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
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

    fn doc_name(entry: &DirectoryEntry) -> String {
        paths::encode_doc_name(&paths::lookup_path(&entry.full_path()))
    }

    fn check_batch_size(&self, len: usize) -> Result<()> {
        if len > self.max_batch_size() {
            return Err(CatalogError::Store(format!(
                "batch of {len} exceeds maximum size {}",
                self.max_batch_size()
            )));
        }
        Ok(())
    }
}

fn entry_from_json(value: serde_json::Value) -> Result<DirectoryEntry> {
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn insert_entries_if_absent(
        &self,
        collection_id: Uuid,
        entries: &[DirectoryEntry],
    ) -> Result<Vec<UpsertOutcome>> {
        self.check_batch_size(entries.len())?;

        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let doc_name = Self::doc_name(entry);
            let inserted = sqlx::query(
                r#"
                INSERT INTO catalog_entry (collection_id, doc_name, file_id, dir_path, entry)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (collection_id, doc_name) DO NOTHING
                "#,
            )
            .bind(collection_id)
            .bind(&doc_name)
            .bind(entry.file_id)
            .bind(&entry.path)
            .bind(serde_json::to_value(entry)?)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() > 0 {
                outcomes.push(UpsertOutcome::Created);
            } else {
                let row = sqlx::query(
                    "SELECT entry FROM catalog_entry WHERE collection_id = $1 AND doc_name = $2",
                )
                .bind(collection_id)
                .bind(&doc_name)
                .fetch_one(&mut *tx)
                .await?;
                outcomes.push(UpsertOutcome::Existing(entry_from_json(row.try_get("entry")?)?));
            }
        }
        tx.commit().await?;
        Ok(outcomes)
    }

    async fn get_entry_by_path(
        &self,
        collection_id: Uuid,
        full_path: &str,
    ) -> Result<Option<DirectoryEntry>> {
        let doc_name = paths::encode_doc_name(&paths::lookup_path(full_path));
        let row = sqlx::query(
            "SELECT entry FROM catalog_entry WHERE collection_id = $1 AND doc_name = $2",
        )
        .bind(collection_id)
        .bind(&doc_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| entry_from_json(r.try_get("entry")?)).transpose()
    }

    async fn get_entry_by_file_id(
        &self,
        collection_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<DirectoryEntry>> {
        let rows = sqlx::query(
            "SELECT entry FROM catalog_entry WHERE collection_id = $1 AND file_id = $2",
        )
        .bind(collection_id)
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > 1 {
            return Err(CatalogError::CorruptMetadata(format!(
                "more than one entry carries file id {file_id}"
            )));
        }
        rows.into_iter()
            .next()
            .map(|r| entry_from_json(r.try_get("entry")?))
            .transpose()
    }

    async fn list_entries_in_dir(
        &self,
        collection_id: Uuid,
        dir_full_path: &str,
    ) -> Result<Vec<DirectoryEntry>> {
        let normalized = paths::normalize(dir_full_path);
        let rows = sqlx::query(
            r#"
            SELECT entry FROM catalog_entry
            WHERE collection_id = $1 AND dir_path = $2
            ORDER BY entry->>'name'
            "#,
        )
        .bind(collection_id)
        .bind(&normalized)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| entry_from_json(r.try_get("entry")?))
            .collect()
    }

    async fn delete_entry(&self, collection_id: Uuid, full_path: &str) -> Result<bool> {
        let doc_name = paths::encode_doc_name(&paths::lookup_path(full_path));
        let deleted =
            sqlx::query("DELETE FROM catalog_entry WHERE collection_id = $1 AND doc_name = $2")
                .bind(collection_id)
                .bind(&doc_name)
                .execute(&self.pool)
                .await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn put_files(&self, collection_id: Uuid, files: &[FileMetadata]) -> Result<()> {
        self.check_batch_size(files.len())?;

        let mut tx = self.pool.begin().await?;
        for file in files {
            sqlx::query(
                r#"
                INSERT INTO catalog_file (collection_id, file_id, metadata)
                VALUES ($1, $2, $3)
                ON CONFLICT (collection_id, file_id) DO UPDATE SET metadata = EXCLUDED.metadata
                "#,
            )
            .bind(collection_id)
            .bind(file.file_id)
            .bind(serde_json::to_value(file)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_file(&self, collection_id: Uuid, file_id: Uuid) -> Result<Option<FileMetadata>> {
        let row = sqlx::query(
            "SELECT metadata FROM catalog_file WHERE collection_id = $1 AND file_id = $2",
        )
        .bind(collection_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Ok(serde_json::from_value(r.try_get("metadata")?)?))
            .transpose()
    }

    async fn delete_file(&self, collection_id: Uuid, file_id: Uuid) -> Result<bool> {
        let deleted =
            sqlx::query("DELETE FROM catalog_file WHERE collection_id = $1 AND file_id = $2")
                .bind(collection_id)
                .bind(file_id)
                .execute(&self.pool)
                .await?;
        Ok(deleted.rows_affected() > 0)
    }
}
