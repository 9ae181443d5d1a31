//! Object storage configuration

use serde::{Deserialize, Serialize};

/// Connection settings for the S3-backed object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket holding ingested objects
    pub bucket: String,
    /// Stable identifier recorded in file metadata for this bucket
    pub bucket_resource_id: String,
    pub region: String,
    /// Custom endpoint (MinIO, localstack); None for AWS proper
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Path-style addressing, required by most S3-compatible servers
    pub path_style: bool,
}

impl StorageConfig {
    /// Load configuration from `DEPOT_STORAGE_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            bucket: std::env::var("DEPOT_STORAGE_BUCKET")
                .unwrap_or_else(|_| "depot-data".to_string()),
            bucket_resource_id: std::env::var("DEPOT_STORAGE_BUCKET_RESOURCE_ID")
                .unwrap_or_else(|_| "depot-data".to_string()),
            region: std::env::var("DEPOT_STORAGE_REGION")
                .unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: std::env::var("DEPOT_STORAGE_ENDPOINT").ok(),
            access_key: std::env::var("DEPOT_STORAGE_ACCESS_KEY").unwrap_or_default(),
            secret_key: std::env::var("DEPOT_STORAGE_SECRET_KEY").unwrap_or_default(),
            path_style: std::env::var("DEPOT_STORAGE_PATH_STYLE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }
}
