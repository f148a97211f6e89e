//! Wiring shared by the `strata` binary: builds the ingestion and lifecycle
//! components from an [`IngestConfig`].

use anyhow::Context as _;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use strata_core::{ContentType, IngestConfig, Job, MediaReference, RetentionPolicy};
use strata_infra::{AuditLogger, RateLimiter, RetryPolicy};
use strata_services::LifecycleManager;
use strata_storage::{create_store, ObjectStore};
use strata_worker::{
    ChunkedTransfer, HttpFetcher, IngestPipeline, Scheduler, SchedulerConfig, StorageUploader,
};

/// Components every command needs.
pub struct AppContext {
    pub config: IngestConfig,
    pub store: Arc<dyn ObjectStore>,
    pub policy: Arc<RetentionPolicy>,
    pub audit: AuditLogger,
}

impl AppContext {
    pub async fn build(config: IngestConfig) -> anyhow::Result<Self> {
        let policy = RetentionPolicy::load(&config.retention_policy_path).with_context(|| {
            format!(
                "Failed to load retention policy from {}",
                config.retention_policy_path.display()
            )
        })?;
        let store = create_store(&config)
            .await
            .context("Failed to initialize storage backend")?;
        let audit = AuditLogger::to_file(&config.audit_log_path)
            .await
            .context("Failed to open audit log")?;

        Ok(Self {
            config,
            store,
            policy: Arc::new(policy),
            audit,
        })
    }

    /// Scheduler running the full download and upload pipeline.
    pub fn scheduler(&self) -> anyhow::Result<Scheduler> {
        let config = &self.config;
        let fetcher = HttpFetcher::new(&config.upstream).context("Failed to build HTTP client")?;
        let limiter = RateLimiter::new(config.rate_limit_per_second, config.rate_limit_burst);

        let transfer = ChunkedTransfer::new(
            Arc::new(fetcher),
            limiter,
            RetryPolicy::new(config.retry.clone()),
            config.chunk_size_bytes,
            config.chunk_fanout,
        );
        let uploader = StorageUploader::new(
            self.store.clone(),
            self.policy.clone(),
            RetryPolicy::new(config.retry.clone()),
            self.audit.clone(),
        );
        let pipeline = IngestPipeline::new(transfer, uploader, config.staging_dir.clone());

        Ok(Scheduler::new(
            SchedulerConfig::from(config),
            Arc::new(pipeline),
        ))
    }

    pub fn lifecycle(&self) -> LifecycleManager {
        LifecycleManager::new(
            self.store.clone(),
            self.policy.clone(),
            self.audit.clone(),
            self.config.lifecycle_concurrency,
        )
    }
}

#[derive(Debug, Deserialize)]
struct JobFile {
    creator_id: String,
    content_type: ContentType,
    media: Vec<JobFileMedia>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobFileMedia {
    Url(String),
    Detailed {
        source_url: String,
        #[serde(default)]
        expected_size: Option<u64>,
    },
}

/// Parse a job document:
/// `{"creator_id": "...", "content_type": "post", "media": ["https://...", {"source_url": "...", "expected_size": 123}]}`.
pub fn parse_job(raw: &str) -> anyhow::Result<Job> {
    let file: JobFile = serde_json::from_str(raw).context("Malformed job document")?;
    let media = file
        .media
        .into_iter()
        .map(|entry| {
            let (url, size) = match entry {
                JobFileMedia::Url(url) => (url, None),
                JobFileMedia::Detailed {
                    source_url,
                    expected_size,
                } => (source_url, expected_size),
            };
            let media = MediaReference::new(file.creator_id.clone(), file.content_type, url);
            match size {
                Some(size) => media.with_expected_size(size),
                None => media,
            }
        })
        .collect();
    Ok(Job::with_media(file.creator_id, file.content_type, media))
}

pub fn load_job(path: &Path) -> anyhow::Result<Job> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    parse_job(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_media_entries() {
        let job = parse_job(
            r#"{
                "creator_id": "creator-5",
                "content_type": "livestream",
                "media": [
                    "https://cdn.example.com/a.mp4",
                    {"source_url": "https://cdn.example.com/b.mp4", "expected_size": 2048}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(job.creator_id, "creator-5");
        assert_eq!(job.content_type, ContentType::Livestream);
        assert_eq!(job.media.len(), 2);
        assert_eq!(job.media[0].expected_size, None);
        assert_eq!(job.media[1].expected_size, Some(2048));
        assert!(job.media.iter().all(|m| m.creator_id == "creator-5"));
    }

    #[test]
    fn rejects_unknown_content_type() {
        let err = parse_job(r#"{"creator_id": "c", "content_type": "reel", "media": []}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Malformed job document"));
    }

    #[tokio::test]
    async fn builds_lifecycle_from_local_config() {
        let dir = tempfile::tempdir().unwrap();
        let policy_path = dir.path().join("retention.json");
        std::fs::write(
            &policy_path,
            r#"[{"content_type": "story", "retention_days": 7}]"#,
        )
        .unwrap();

        let storage = dir.path().join("bucket").display().to_string();
        let policy = policy_path.display().to_string();
        let audit = dir.path().join("audit.log").display().to_string();
        let config = IngestConfig::from_source(|key| match key {
            "STORAGE_BACKEND" => Some("local".to_string()),
            "LOCAL_STORAGE_PATH" => Some(storage.clone()),
            "RETENTION_POLICY_PATH" => Some(policy.clone()),
            "AUDIT_LOG_PATH" => Some(audit.clone()),
            _ => None,
        })
        .unwrap();

        let context = AppContext::build(config).await.unwrap();
        let summary = context.lifecycle().sweep(chrono::Utc::now()).await;
        assert_eq!(summary.scanned, 0);
        assert!(context.scheduler().is_ok());
    }
}
