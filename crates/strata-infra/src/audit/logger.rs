use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use strata_core::AuditEntry;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to write audit entry to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for audit entries. Implementations only ever append.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Appends one line per entry to a file.
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| AuditError::Write {
                    path: path.clone(),
                    source,
                })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| AuditError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = format!("{}\n", entry);
        let mut file = self.file.lock().await;
        let write = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        };
        write.await.map_err(|source| AuditError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Emits entries as `tracing` events on the `strata::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "strata::audit",
            actor = %entry.actor,
            action = %entry.action,
            object_key = %entry.object_key,
            size = entry.size,
            status = %entry.status,
            "{}",
            entry
        );
        Ok(())
    }
}

/// Keeps entries in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: StdMutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|_| AuditError::Unavailable("memory sink poisoned".to_string()))?
            .push(entry.clone());
        Ok(())
    }
}

/// Fans entries out to every configured sink.
#[derive(Clone, Default)]
pub struct AuditLogger {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Logger writing to `path` and mirroring entries to tracing.
    pub async fn to_file(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = FileAuditSink::open(path).await?;
        Ok(Self::new()
            .with_sink(Arc::new(file))
            .with_sink(Arc::new(TracingAuditSink)))
    }

    /// Record `entry` in every sink. Every sink is attempted; the first
    /// failure is returned.
    pub async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(entry).await {
                tracing::error!(
                    error = %e,
                    object_key = %entry.object_key,
                    action = %entry.action,
                    "Failed to record audit entry"
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use strata_core::{AuditAction, AuditActor, AuditStatus};

    fn entry(key: &str, action: AuditAction) -> AuditEntry {
        AuditEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 4, 1, 8, 30, 0).unwrap(),
            actor: AuditActor::Lifecycle,
            action,
            object_key: key.to_string(),
            size: 512,
            status: AuditStatus::Success,
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/audit.log");

        let logger = AuditLogger::to_file(&path).await.unwrap();
        logger
            .record(&entry("stories/1/a.mp4", AuditAction::Delete))
            .await
            .unwrap();
        drop(logger);

        // Reopening must append, never truncate
        let logger = AuditLogger::to_file(&path).await.unwrap();
        logger
            .record(&entry("posts/1/b.mp4", AuditAction::Transition))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "2026-04-01T08:30:00.000Z [R2-AUDIT] user=lifecycle action=delete \
             object_key=stories/1/a.mp4 metadata_size=512 status=success"
        );
        assert!(lines[1].contains("action=transition object_key=posts/1/b.mp4"));
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_starve_others() {
        let memory = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new()
            .with_sink(Arc::new(BrokenSink))
            .with_sink(memory.clone());

        let result = logger
            .record(&entry("stories/1/a.mp4", AuditAction::Delete))
            .await;

        assert!(matches!(result, Err(AuditError::Unavailable(_))));
        assert_eq!(memory.entries().len(), 1);
    }
}
