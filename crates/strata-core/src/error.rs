//! Error taxonomy for ingestion and lifecycle management.
//!
//! Task-level failures are captured into job status rather than propagated to
//! the scheduler, and lifecycle failures are collected into a sweep summary.
//! The only fatal condition is a malformed retention policy at startup.

use std::io;
use std::time::Duration;

use crate::models::ContentType;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Upstream rejected request with status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<IngestError>,
    },

    #[error("Incomplete transfer: expected {expected} bytes, staged {actual}")]
    IncompleteTransfer { expected: u64, actual: u64 },

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Conflicting retention rules for content type {content_type}")]
    RuleConflict { content_type: ContentType },

    #[error("Invalid retention rule: {0}")]
    InvalidRule(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("All media of this job are already being ingested: {0}")]
    DuplicateInFlight(String),

    #[error("Job contains no media references")]
    EmptyJob,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Storage backend error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IngestError {
    /// Machine-readable error code, stable across releases.
    pub fn error_code(&self) -> &'static str {
        match self {
            IngestError::TransientNetwork(_) => "transient_network_error",
            IngestError::Upstream { .. } => "upstream_error",
            IngestError::Timeout(_) => "timeout",
            IngestError::RetryExhausted { .. } => "retry_exhausted",
            IngestError::IncompleteTransfer { .. } => "incomplete_transfer",
            IngestError::Upload(_) => "upload_error",
            IngestError::RuleConflict { .. } => "rule_conflict",
            IngestError::InvalidRule(_) => "invalid_rule",
            IngestError::ObjectNotFound(_) => "object_not_found",
            IngestError::Canceled => "canceled",
            IngestError::DuplicateInFlight(_) => "duplicate_in_flight",
            IngestError::EmptyJob => "empty_job",
            IngestError::JobNotFound(_) => "job_not_found",
            IngestError::Storage(_) => "storage_error",
            IngestError::Config(_) => "config_error",
            IngestError::Io(_) => "io_error",
        }
    }

    /// Whether another attempt of the same operation may succeed.
    ///
    /// Upstream 429 and 5xx responses are recoverable; other upstream statuses
    /// are not. `IncompleteTransfer` is recoverable here and the worker bounds
    /// it to a single extra attempt.
    pub fn is_recoverable(&self) -> bool {
        match self {
            IngestError::TransientNetwork(_)
            | IngestError::Timeout(_)
            | IngestError::IncompleteTransfer { .. }
            | IngestError::Upload(_)
            | IngestError::Storage(_)
            | IngestError::Io(_) => true,
            IngestError::Upstream { status, .. } => *status == 429 || *status >= 500,
            IngestError::RetryExhausted { .. }
            | IngestError::RuleConflict { .. }
            | IngestError::InvalidRule(_)
            | IngestError::ObjectNotFound(_)
            | IngestError::Canceled
            | IngestError::DuplicateInFlight(_)
            | IngestError::EmptyJob
            | IngestError::JobNotFound(_)
            | IngestError::Config(_) => false,
        }
    }

    /// Whether the error reflects an external cancellation rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, IngestError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_classification() {
        let throttled = IngestError::Upstream {
            status: 429,
            message: "slow down".into(),
        };
        let gone = IngestError::Upstream {
            status: 404,
            message: "missing".into(),
        };
        assert!(throttled.is_recoverable());
        assert!(!gone.is_recoverable());
    }

    #[test]
    fn retry_exhausted_keeps_last_error() {
        let err = IngestError::RetryExhausted {
            attempts: 4,
            last: Box::new(IngestError::TransientNetwork("reset".into())),
        };
        assert_eq!(err.error_code(), "retry_exhausted");
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("reset"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Transient network error: reset"));
    }
}
