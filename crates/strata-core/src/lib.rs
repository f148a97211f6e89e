//! Strata Core Library
//!
//! This crate provides the domain models, error taxonomy, retention policy and
//! configuration shared by every Strata component.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::IngestConfig;
pub use error::{IngestError, IngestResult};
pub use models::{
    AuditAction, AuditActor, AuditEntry, AuditStatus, ContentType, FailedMedia, Job, JobId,
    JobState, JobStatus, MediaReference, ObjectTags, RetentionPolicy, RetentionRule,
    StorageClass, StoredObject, TaskCounts, TaskFailure, TaskState, TransferTask, Transition,
};
pub use storage_types::StorageBackend;
