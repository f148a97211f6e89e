use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;

use super::content::ContentType;
use super::job::{Job, JobId, MediaReference};
use crate::error::IngestError;

/// Lifecycle of a single transfer task.
///
/// `Pending -> Downloading -> Downloaded -> Uploading -> Stored | Failed`,
/// with `Canceled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Downloading,
    Downloaded,
    Uploading,
    Stored,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Stored | TaskState::Failed | TaskState::Canceled
        )
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Downloading => write!(f, "downloading"),
            TaskState::Downloaded => write!(f, "downloaded"),
            TaskState::Uploading => write!(f, "uploading"),
            TaskState::Stored => write!(f, "stored"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFailure {
    pub code: String,
    pub message: String,
}

impl From<&IngestError> for TaskFailure {
    fn from(err: &IngestError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    pub media: MediaReference,
    pub state: TaskState,
    pub attempt_count: u32,
    pub bytes_transferred: u64,
    pub staging_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
}

impl TransferTask {
    pub fn new(media: MediaReference) -> Self {
        Self {
            media,
            state: TaskState::Pending,
            attempt_count: 0,
            bytes_transferred: 0,
            staging_path: None,
            object_key: None,
            failure: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub downloading: usize,
    pub downloaded: usize,
    pub uploading: usize,
    pub stored: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl TaskCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Downloading => self.downloading += 1,
            TaskState::Downloaded => self.downloaded += 1,
            TaskState::Uploading => self.uploading += 1,
            TaskState::Stored => self.stored += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Canceled => self.canceled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.downloading
            + self.downloaded
            + self.uploading
            + self.stored
            + self.failed
            + self.canceled
    }

    pub fn terminal(&self) -> usize {
        self.stored + self.failed + self.canceled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    PartiallyFailed,
    Canceled,
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::PartiallyFailed => write!(f, "partially_failed"),
            JobState::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedMedia {
    pub media: MediaReference,
    pub failure: TaskFailure,
}

/// Aggregate, point-in-time view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub creator_id: String,
    pub content_type: ContentType,
    pub state: JobState,
    pub counts: TaskCounts,
    pub failed: Vec<FailedMedia>,
    pub bytes_transferred: u64,
    pub progress_percent: f64,
    pub requested_at: DateTime<Utc>,
}

impl JobStatus {
    /// Aggregate task snapshots into a job status.
    ///
    /// A job stays `Running` while any task is non-terminal. Once all tasks are
    /// terminal, an external cancellation wins, then any failure makes the job
    /// `PartiallyFailed`.
    pub fn aggregate(job: &Job, tasks: &[TransferTask], cancel_requested: bool) -> Self {
        let mut counts = TaskCounts::default();
        let mut bytes_transferred = 0;
        let mut failed = Vec::new();

        for task in tasks {
            counts.record(task.state);
            bytes_transferred += task.bytes_transferred;
            if task.state == TaskState::Failed {
                failed.push(FailedMedia {
                    media: task.media.clone(),
                    failure: task.failure.clone().unwrap_or(TaskFailure {
                        code: "unknown".to_string(),
                        message: "task failed without a recorded error".to_string(),
                    }),
                });
            }
        }

        let total = counts.total();
        let state = if counts.terminal() < total {
            JobState::Running
        } else if cancel_requested {
            JobState::Canceled
        } else if counts.failed > 0 {
            JobState::PartiallyFailed
        } else {
            JobState::Completed
        };

        let progress_percent = if total == 0 {
            100.0
        } else {
            counts.terminal() as f64 / total as f64 * 100.0
        };

        Self {
            job_id: job.id,
            creator_id: job.creator_id.clone(),
            content_type: job.content_type,
            state,
            counts,
            failed,
            bytes_transferred,
            progress_percent,
            requested_at: job.requested_at,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state != JobState::Running
    }

    /// Media references to resubmit after a partial failure.
    pub fn failed_media(&self) -> Vec<MediaReference> {
        self.failed.iter().map(|f| f.media.clone()).collect()
    }
}
