//! Strata Infrastructure Library
//!
//! This crate provides shared infrastructure components used by the ingestion
//! workers and the lifecycle manager:
//! - Rate limiting of upstream requests
//! - Retry with exponential backoff and per-attempt timeouts
//! - Audit logging
//! - Telemetry initialization

#[cfg(feature = "rate-limit")]
pub mod rate_limit;

#[cfg(feature = "retry")]
pub mod retry;

#[cfg(feature = "audit")]
pub mod audit;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

// Re-export commonly used types
#[cfg(feature = "rate-limit")]
pub use rate_limit::RateLimiter;

#[cfg(feature = "retry")]
pub use retry::{
    AttemptError, Recoverable, RetryError, RetryPolicy, RetryState, Sleeper, TokioSleeper,
};

#[cfg(feature = "audit")]
pub use audit::{
    AuditError, AuditLogger, AuditSink, FileAuditSink, MemoryAuditSink, TracingAuditSink,
};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};
