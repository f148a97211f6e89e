use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use strata_core::{
    IngestError, IngestResult, MediaReference, StoredObject, TaskFailure, TaskState, TransferTask,
};
use strata_storage::object_key;
use tokio_util::sync::CancellationToken;

use crate::transfer::ChunkedTransfer;
use crate::upload::StorageUploader;

/// Shared, mutable view of one transfer task.
///
/// Updated by the worker running the task and read by status queries. The
/// lock is never held across an await point.
#[derive(Clone, Debug)]
pub struct TaskReporter {
    task: Arc<Mutex<TransferTask>>,
}

impl TaskReporter {
    pub fn new(media: MediaReference) -> Self {
        Self {
            task: Arc::new(Mutex::new(TransferTask::new(media))),
        }
    }

    // A worker that panicked mid-update leaves a usable task behind
    fn lock(&self) -> MutexGuard<'_, TransferTask> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> TransferTask {
        self.lock().clone()
    }

    pub fn media(&self) -> MediaReference {
        self.lock().media.clone()
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    /// Move to `state` unless the task already reached a terminal state.
    pub fn set_state(&self, state: TaskState) {
        let mut task = self.lock();
        if !task.state.is_terminal() {
            task.state = state;
        }
    }

    pub fn set_staging_path(&self, path: &Path) {
        self.lock().staging_path = Some(path.to_path_buf());
    }

    pub fn set_bytes(&self, bytes: u64) {
        self.lock().bytes_transferred = bytes;
    }

    pub fn record_attempt(&self) -> u32 {
        let mut task = self.lock();
        task.attempt_count += 1;
        task.attempt_count
    }

    pub fn complete(&self, object: &StoredObject) {
        let mut task = self.lock();
        if task.state.is_terminal() {
            return;
        }
        task.state = TaskState::Stored;
        task.object_key = Some(object.object_key.clone());
        task.bytes_transferred = object.size;
    }

    pub fn fail(&self, failure: TaskFailure) {
        let mut task = self.lock();
        if task.state.is_terminal() {
            return;
        }
        task.state = TaskState::Failed;
        task.failure = Some(failure);
    }

    pub fn cancel(&self) {
        self.set_state(TaskState::Canceled);
    }
}

/// Work performed for one media reference once the scheduler grants it a slot.
#[async_trait]
pub trait TaskPipeline: Send + Sync {
    async fn run(
        &self,
        reporter: &TaskReporter,
        cancel: &CancellationToken,
    ) -> IngestResult<StoredObject>;
}

/// Download into staging, upload, then discard the staged file.
pub struct IngestPipeline {
    transfer: ChunkedTransfer,
    uploader: StorageUploader,
    staging_dir: PathBuf,
}

impl IngestPipeline {
    pub fn new(transfer: ChunkedTransfer, uploader: StorageUploader, staging_dir: PathBuf) -> Self {
        Self {
            transfer,
            uploader,
            staging_dir,
        }
    }

    /// Staging location for `media`, stable across runs so transfers resume.
    pub fn staging_path(&self, media: &MediaReference) -> PathBuf {
        self.staging_dir.join(format!("{}.part", object_key(media)))
    }

    async fn download(
        &self,
        media: &MediaReference,
        staging_path: &Path,
        reporter: &TaskReporter,
        cancel: &CancellationToken,
    ) -> IngestResult<()> {
        let progress = |bytes: u64| reporter.set_bytes(bytes);
        let mut restarted = false;

        loop {
            let attempt = reporter.record_attempt();
            match self
                .transfer
                .download(media, staging_path, cancel, &progress)
                .await
            {
                Ok(outcome) => {
                    tracing::debug!(
                        attempt,
                        bytes_total = outcome.bytes_total,
                        resumed_from = outcome.resumed_from,
                        "Media staged"
                    );
                    return Ok(());
                }
                Err(e @ IngestError::IncompleteTransfer { .. }) if !restarted => {
                    // One more try from scratch, then the task fails
                    tracing::warn!(error = %e, attempt, "Staged file incomplete, restarting transfer");
                    remove_staging(staging_path).await;
                    restarted = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn remove_staging(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Failed to remove staging file");
        }
    }
}

#[async_trait]
impl TaskPipeline for IngestPipeline {
    async fn run(
        &self,
        reporter: &TaskReporter,
        cancel: &CancellationToken,
    ) -> IngestResult<StoredObject> {
        let media = reporter.media();
        let staging_path = self.staging_path(&media);
        reporter.set_staging_path(&staging_path);

        reporter.set_state(TaskState::Downloading);
        self.download(&media, &staging_path, reporter, cancel)
            .await?;
        reporter.set_state(TaskState::Downloaded);

        reporter.set_state(TaskState::Uploading);
        let object = self.uploader.store(&staging_path, &media, cancel).await?;
        remove_staging(&staging_path).await;

        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ContentType;

    #[test]
    fn terminal_state_is_sticky() {
        let reporter = TaskReporter::new(MediaReference::new("c", ContentType::Post, "u"));
        reporter.set_state(TaskState::Downloading);
        reporter.cancel();
        reporter.set_state(TaskState::Uploading);
        reporter.fail(TaskFailure {
            code: "late".into(),
            message: "late".into(),
        });

        let task = reporter.snapshot();
        assert_eq!(task.state, TaskState::Canceled);
        assert!(task.failure.is_none());
    }

    #[test]
    fn attempts_accumulate() {
        let reporter = TaskReporter::new(MediaReference::new("c", ContentType::Post, "u"));
        assert_eq!(reporter.record_attempt(), 1);
        assert_eq!(reporter.record_attempt(), 2);
        assert_eq!(reporter.snapshot().attempt_count, 2);
    }
}
