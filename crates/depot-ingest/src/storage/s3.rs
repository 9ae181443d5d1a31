//! S3-backed object store
//!
//! Copies run server-side (`CopyObject`), so the service computes sizes
//! and checksums; we read them back with `HeadObject` rather than
//! streaming bytes through this process.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{ProvideErrorMetadata, SdkError},
    Client,
};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{predictable_file_id, FileInfo, ObjectStore, Result, StorageConfig, StorageError};

/// Object store on an S3 (or S3-compatible) bucket.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    bucket_resource_id: String,
}

impl S3ObjectStore {
    pub async fn new(config: StorageConfig) -> anyhow::Result<Self> {
        debug!(bucket = %config.bucket, region = %config.region, "Initializing object store");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "depot-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());
        info!(bucket = %config.bucket, "Object store client initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
            bucket_resource_id: config.bucket_resource_id,
        })
    }

    /// Key an ingested object under its file id so distinct collections
    /// never collide on equal target paths.
    fn object_key(&self, file_id: Uuid, target_path: &str) -> String {
        format!("{}{}", file_id.as_simple(), super::normalize_target(target_path))
    }

    fn cloud_path(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn head(&self, bucket: &str, key: &str, context: &str) -> Result<FileInfo> {
        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(context, e))?;

        // ETags of single-part uploads are plain MD5 hex; multipart ETags
        // (containing '-') are not usable as content checksums.
        let md5 = head
            .e_tag()
            .map(|t| t.trim_matches('"').to_string())
            .filter(|t| !t.contains('-'));

        Ok(FileInfo {
            file_id: Uuid::nil(),
            bucket_resource_id: self.bucket_resource_id.clone(),
            cloud_path: format!("s3://{bucket}/{key}"),
            size: head.content_length().unwrap_or(0),
            checksum_crc32c: head.checksum_crc32_c().map(str::to_string),
            checksum_md5: md5,
            created_date: Utc::now(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn copy(
        &self,
        source_path: &str,
        target_path: &str,
        file_id: Option<Uuid>,
    ) -> Result<FileInfo> {
        let (source_bucket, source_key) = parse_s3_path(source_path)?;

        // The copy must land at a key derivable from its inputs so a
        // retried copy overwrites rather than duplicates. With no caller
        // id we probe the source first and derive a content-addressed id.
        let file_id = match file_id {
            Some(id) => id,
            None => {
                let source_info = self.head(&source_bucket, &source_key, source_path).await?;
                let fingerprint = source_info
                    .checksum_md5
                    .or(source_info.checksum_crc32c)
                    .unwrap_or_else(|| source_info.size.to_string());
                predictable_file_id(&fingerprint, target_path)
            },
        };

        let key = self.object_key(file_id, target_path);
        debug!(source = %source_path, target = %self.cloud_path(&key), "Copying object");

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{source_bucket}/{source_key}"))
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(source_path, e))?;

        let mut info = self.head(&self.bucket, &key, target_path).await?;
        info.file_id = file_id;
        Ok(info)
    }

    async fn link(&self, source_path: &str, file_id: Option<Uuid>) -> Result<FileInfo> {
        let (bucket, key) = parse_s3_path(source_path)?;
        let mut info = self.head(&bucket, &key, source_path).await?;
        info.file_id = match file_id {
            Some(id) => id,
            None => {
                let fingerprint = info
                    .checksum_md5
                    .clone()
                    .or(info.checksum_crc32c.clone())
                    .unwrap_or_else(|| info.size.to_string());
                predictable_file_id(&fingerprint, source_path)
            },
        };
        Ok(info)
    }

    async fn read(&self, source_path: &str) -> Result<Vec<u8>> {
        let (bucket, key) = parse_s3_path(source_path)?;
        let response = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(source_path, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("reading {source_path}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, cloud_path: &str) -> Result<bool> {
        let (bucket, key) = parse_s3_path(cloud_path)?;
        self.client
            .delete_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(cloud_path, e))?;
        Ok(true)
    }

    async fn unlink(&self, cloud_path: &str) -> Result<()> {
        // Linked objects are shared with their owners; dropping a usage
        // never removes the object itself.
        debug!(cloud_path = %cloud_path, "Dropping link usage");
        Ok(())
    }
}

/// Split `s3://bucket/key` into its parts.
fn parse_s3_path(path: &str) -> Result<(String, String)> {
    let rest = path
        .strip_prefix("s3://")
        .ok_or_else(|| StorageError::Permanent(format!("not an s3 path: {path}")))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        },
        _ => Err(StorageError::Permanent(format!("not an s3 path: {path}"))),
    }
}

/// Map an SDK failure onto the transient/permanent split.
fn classify<E, R>(context: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            return StorageError::Transient(format!("{context}: {err:?}"));
        },
        _ => {},
    }
    match err.code() {
        Some("NoSuchKey") | Some("NotFound") | Some("NoSuchBucket") => {
            StorageError::NotFound(context.to_string())
        },
        Some("SlowDown") | Some("RequestTimeout") | Some("InternalError")
        | Some("ServiceUnavailable") => StorageError::Transient(format!("{context}: {err:?}")),
        _ => StorageError::Permanent(format!("{context}: {err:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_path() {
        assert_eq!(
            parse_s3_path("s3://bucket/a/b.txt").unwrap(),
            ("bucket".to_string(), "a/b.txt".to_string())
        );
        assert!(parse_s3_path("gs://bucket/a").is_err());
        assert!(parse_s3_path("s3://bucket-only").is_err());
    }
}
