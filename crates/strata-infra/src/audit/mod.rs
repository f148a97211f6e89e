//! Audit logging
//!
//! Append-only trail of upload, transition and delete actions, rendered in the
//! fixed `[R2-AUDIT]` line format.

mod logger;

pub use logger::{
    AuditError, AuditLogger, AuditSink, FileAuditSink, MemoryAuditSink, TracingAuditSink,
};
