use crate::traits::{KeyStream, ObjectStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{MetadataDirective, StorageClass as S3StorageClass};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::Path;
use strata_core::{ObjectTags, StorageClass, StoredObject};

/// Connection settings for an S3-compatible provider.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers (Cloudflare R2, MinIO, ...)
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Provider storage class used for `ARCHIVE` objects.
    pub archive_storage_class: String,
}

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    archive_class: String,
}

impl S3Storage {
    pub async fn new(settings: S3Settings) -> StorageResult<Self> {
        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(settings.region.clone()));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(3)
            .with_retry_mode(RetryMode::Adaptive);

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone())
            .load()
            .await;

        let client = if let Some(ref endpoint) = settings.endpoint_url {
            // S3-compatible providers need path-style addressing
            let mut builder = aws_sdk_s3::config::Builder::from(&config)
                .endpoint_url(endpoint)
                .retry_config(retry_config)
                .force_path_style(true);
            if let (Some(key_id), Some(secret)) =
                (&settings.access_key_id, &settings.secret_access_key)
            {
                builder = builder.credentials_provider(Credentials::new(
                    key_id.clone(),
                    secret.clone(),
                    None,
                    None,
                    "strata-config",
                ));
            }
            Client::from_conf(builder.build())
        } else {
            Client::new(&config)
        };

        tracing::info!(
            bucket = %settings.bucket,
            region = %settings.region,
            endpoint = settings.endpoint_url.as_deref().unwrap_or("aws"),
            archive_class = %settings.archive_storage_class,
            "S3 storage initialized"
        );

        Ok(S3Storage {
            client,
            bucket: settings.bucket,
            archive_class: settings.archive_storage_class,
        })
    }

    fn provider_class(&self, class: StorageClass) -> S3StorageClass {
        match class {
            StorageClass::Standard => S3StorageClass::Standard,
            StorageClass::Archive => S3StorageClass::from(self.archive_class.as_str()),
        }
    }

    /// Providers omit the storage class header for STANDARD objects.
    fn logical_class(&self, class: Option<&S3StorageClass>) -> StorageClass {
        match class {
            Some(c) if c.as_str() == self.archive_class => StorageClass::Archive,
            _ => StorageClass::Standard,
        }
    }

    async fn head(&self, key: &str) -> StorageResult<(HashMap<String, String>, StorageClass, u64)> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::BackendError(e.to_string())
                }
            })?;

        let metadata = response.metadata().cloned().unwrap_or_default();
        let class = self.logical_class(response.storage_class());
        let size = response.content_length().unwrap_or(0).max(0) as u64;
        Ok((metadata, class, size))
    }

    async fn put_body(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        tags: &ObjectTags,
        storage_class: StorageClass,
    ) -> StorageResult<()> {
        let start = std::time::Instant::now();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_length(size as i64)
            .content_type(&tags.mime_type)
            .set_metadata(Some(tags.to_metadata()))
            .storage_class(self.provider_class(storage_class))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            storage_class = %storage_class,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        tags: &ObjectTags,
        storage_class: StorageClass,
    ) -> StorageResult<()> {
        let size = data.len() as u64;
        self.put_body(key, ByteStream::from(data), size, tags, storage_class)
            .await
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        tags: &ObjectTags,
        storage_class: StorageClass,
    ) -> StorageResult<u64> {
        let size = tokio::fs::metadata(path).await?.len();
        let body = ByteStream::from_path(path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to open {}: {}", path.display(), e))
        })?;
        self.put_body(key, body, size, tags, storage_class).await?;
        Ok(size)
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<StoredObject> {
        let (metadata, class, size) = self.head(key).await?;
        let tags = ObjectTags::from_metadata(key, &metadata)
            .map_err(|e| StorageError::InvalidMetadata(e.to_string()))?;
        Ok(StoredObject::from_tags(key, tags, class, size))
    }

    async fn set_storage_class(
        &self,
        key: &str,
        storage_class: StorageClass,
        transitioned_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let (metadata, _, _) = self.head(key).await?;
        let mut tags = ObjectTags::from_metadata(key, &metadata)
            .map_err(|e| StorageError::InvalidMetadata(e.to_string()))?;
        tags.last_transition_at = Some(transitioned_at);

        // URL-encode the copy source per AWS S3 API requirements
        let copy_source = format!("{}/{}", self.bucket, urlencoding::encode(key));

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(&copy_source)
            .key(key)
            .storage_class(self.provider_class(storage_class))
            .metadata_directive(MetadataDirective::Replace)
            .content_type(&tags.mime_type)
            .set_metadata(Some(tags.to_metadata()))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    "S3 storage class change failed"
                );
                StorageError::BackendError(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            storage_class = %storage_class,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 storage class changed"
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();

        // DeleteObject succeeds for missing keys
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                StorageError::DeleteFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );
        Ok(())
    }

    fn list(&self, prefix: &str) -> KeyStream {
        struct Cursor {
            client: Client,
            bucket: String,
            prefix: String,
            token: Option<String>,
            done: bool,
        }

        let cursor = Cursor {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            prefix: prefix.to_string(),
            token: None,
            done: false,
        };

        stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.done {
                return Ok::<_, StorageError>(None);
            }
            let page = cursor
                .client
                .list_objects_v2()
                .bucket(&cursor.bucket)
                .prefix(&cursor.prefix)
                .set_continuation_token(cursor.token.take())
                .send()
                .await
                .map_err(|e| StorageError::BackendError(e.to_string()))?;

            let keys: Vec<String> = page
                .contents()
                .iter()
                .filter_map(|object| object.key().map(str::to_string))
                .collect();

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    cursor.token = Some(token.to_string());
                }
                _ => cursor.done = true,
            }

            Ok(Some((keys, cursor)))
        })
        .map_ok(|keys| stream::iter(keys.into_iter().map(Ok::<String, StorageError>)))
        .try_flatten()
        .boxed()
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn unreachable_store() -> S3Storage {
        S3Storage::new(S3Settings {
            bucket: "ugc".to_string(),
            region: "auto".to_string(),
            endpoint_url: Some("http://127.0.0.1:9".to_string()),
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            archive_storage_class: "STANDARD_IA".to_string(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn archive_maps_to_configured_provider_class() {
        let store = unreachable_store().await;
        let archive = store.provider_class(StorageClass::Archive);
        assert_eq!(archive.as_str(), "STANDARD_IA");
        assert_eq!(store.logical_class(Some(&archive)), StorageClass::Archive);
        assert_eq!(store.logical_class(None), StorageClass::Standard);
    }

    #[tokio::test]
    async fn listing_surfaces_backend_errors_as_stream_items() {
        let store = unreachable_store().await;
        let mut keys = store.list("stories/");

        let first = keys.next().await.expect("listing yields an item");
        assert!(matches!(first, Err(StorageError::BackendError(_))));
    }
}
