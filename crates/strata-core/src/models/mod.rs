pub mod audit;
pub mod content;
pub mod job;
pub mod object;
pub mod retention;
pub mod task;

pub use audit::{AuditAction, AuditActor, AuditEntry, AuditStatus};
pub use content::{ContentType, StorageClass};
pub use job::{Job, JobId, MediaReference};
pub use object::{ObjectTags, StoredObject};
pub use retention::{RetentionPolicy, RetentionRule, Transition};
pub use task::{
    FailedMedia, JobState, JobStatus, TaskCounts, TaskFailure, TaskState, TransferTask,
};
