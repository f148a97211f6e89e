//! Strata Storage Library
//!
//! Tiered object storage for ingested media: the `ObjectStore` trait, an
//! S3-compatible backend (AWS S3, Cloudflare R2, MinIO) and a local
//! filesystem backend used for development and tests.
//!
//! # Object key format
//!
//! Keys are `{content prefix}/{creator_id}/{digest}.{ext}` where the digest is
//! derived from the source URL, so re-uploading the same media overwrites the
//! existing object. Key generation lives in the `keys` module so every backend
//! and the uploader agree on it.

#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;

pub mod factory;
pub mod keys;
pub mod traits;

// Re-export commonly used types
pub use factory::create_store;
pub use keys::{detect_mime_type, object_key, source_digest};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::{S3Settings, S3Storage};
pub use strata_core::StorageBackend;
pub use traits::{KeyStream, ObjectStore, StorageError, StorageResult};
