//! Object storage abstraction
//!
//! Every backend implements [`ObjectStore`]. The uploader writes through it and
//! the lifecycle manager reads metadata, changes storage classes and deletes
//! through it.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::path::Path;
use strata_core::{IngestError, ObjectTags, StorageBackend, StorageClass, StoredObject};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Object metadata unreadable: {0}")]
    InvalidMetadata(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => IngestError::ObjectNotFound(key),
            StorageError::UploadFailed(msg) => IngestError::Upload(msg),
            StorageError::IoError(e) => IngestError::Io(e),
            StorageError::ConfigError(msg) => IngestError::Config(msg),
            other => IngestError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Lazily paginated stream of object keys.
pub type KeyStream = BoxStream<'static, StorageResult<String>>;

/// Object storage abstraction
///
/// Writes are idempotent per key: storing under an existing key replaces the
/// object. `delete` succeeds when the object is already gone.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` with the given tags and initial storage class.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        tags: &ObjectTags,
        storage_class: StorageClass,
    ) -> StorageResult<()>;

    /// Store the file at `path` under `key`, returning the stored size.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        tags: &ObjectTags,
        storage_class: StorageClass,
    ) -> StorageResult<u64>;

    /// Fetch an object's metadata. `NotFound` when the key does not exist.
    async fn get_metadata(&self, key: &str) -> StorageResult<StoredObject>;

    /// Move an object to another storage class and stamp `last-transition-at`.
    async fn set_storage_class(
        &self,
        key: &str,
        storage_class: StorageClass,
        transitioned_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Stream all keys beginning with `prefix`.
    fn list(&self, prefix: &str) -> KeyStream;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
