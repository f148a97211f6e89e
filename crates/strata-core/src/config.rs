//! Configuration module
//!
//! Ingestion, storage and lifecycle settings read from the environment
//! (optionally through a `.env` file).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const RATE_LIMIT_PER_SECOND: u32 = 10;
const RATE_LIMIT_BURST: u32 = 1;
const WORKER_MAX_CONCURRENT: usize = 3;
const WORKER_MAX_PER_CREATOR: usize = 2;
const CHUNK_SIZE_BYTES: u64 = 1024 * 1024;
const CHUNK_FANOUT: usize = 2;
const MAX_CHUNK_FANOUT: usize = 4;
const RETRY_MAX_RETRIES: u32 = 3;
const RETRY_ATTEMPT_TIMEOUT_SECS: u64 = 30;
const RETRY_BACKOFF_BASE_MS: u64 = 500;
const RETRY_BACKOFF_MAX_MS: u64 = 30_000;
const RETRY_JITTER_RATIO: f64 = 0.2;
const JOB_RETENTION_SECS: u64 = 3600;
const LIFECYCLE_INTERVAL_SECS: u64 = 86_400;
const LIFECYCLE_CONCURRENCY: usize = 8;
const UPSTREAM_TIMEOUT_SECS: u64 = 30;
const UPSTREAM_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const UPSTREAM_REFERER: &str = "https://www.douyin.com/";

#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter_ratio: f64,
}

#[derive(Clone, Debug)]
pub struct UpstreamSettings {
    pub user_agent: String,
    pub referer: String,
    pub cookie: Option<String>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub environment: String,
    pub log_json: bool,
    // Upstream throttling and concurrency
    pub rate_limit_per_second: u32,
    /// Token-bucket capacity, at most `rate_limit_per_second`. Any value above
    /// 1 lets an idle limiter grant up to `burst + rate - 1` permits inside one
    /// sliding second; keep the default of 1 to hold that window at `rate`.
    pub rate_limit_burst: u32,
    pub max_workers: usize,
    pub max_per_creator: usize,
    // Chunked transfer
    pub chunk_size_bytes: u64,
    pub chunk_fanout: usize,
    pub staging_dir: PathBuf,
    pub retry: RetrySettings,
    pub job_retention: Duration,
    pub upstream: UpstreamSettings,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (R2, MinIO, ...)
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    /// Provider storage class that `ARCHIVE` maps to.
    pub s3_archive_storage_class: String,
    pub local_storage_path: Option<PathBuf>,
    // Lifecycle
    pub retention_policy_path: PathBuf,
    pub audit_log_path: PathBuf,
    pub lifecycle_interval: Duration,
    pub lifecycle_concurrency: usize,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        fn parse_or<T: std::str::FromStr>(
            raw: Option<String>,
            key: &str,
            default: T,
        ) -> Result<T, anyhow::Error> {
            match raw {
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a valid number, got {:?}", key, value)),
                None => Ok(default),
            }
        }

        let environment = var("ENVIRONMENT")
            .or_else(|| var("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(raw) => raw.parse::<StorageBackend>()?,
            None => StorageBackend::S3,
        };

        let r2_account_id = var("R2_ACCOUNT_ID");
        let s3_endpoint = var("S3_ENDPOINT").or_else(|| var("R2_ENDPOINT")).or_else(|| {
            r2_account_id
                .as_ref()
                .map(|account| format!("https://{}.r2.cloudflarestorage.com", account))
        });

        let retry = RetrySettings {
            max_retries: parse_or(var("RETRY_MAX_RETRIES"), "RETRY_MAX_RETRIES", RETRY_MAX_RETRIES)?,
            attempt_timeout: Duration::from_secs(parse_or(
                var("RETRY_ATTEMPT_TIMEOUT_SECS"),
                "RETRY_ATTEMPT_TIMEOUT_SECS",
                RETRY_ATTEMPT_TIMEOUT_SECS,
            )?),
            backoff_base: Duration::from_millis(parse_or(
                var("RETRY_BACKOFF_BASE_MS"),
                "RETRY_BACKOFF_BASE_MS",
                RETRY_BACKOFF_BASE_MS,
            )?),
            backoff_max: Duration::from_millis(parse_or(
                var("RETRY_BACKOFF_MAX_MS"),
                "RETRY_BACKOFF_MAX_MS",
                RETRY_BACKOFF_MAX_MS,
            )?),
            jitter_ratio: parse_or(var("RETRY_JITTER_RATIO"), "RETRY_JITTER_RATIO", RETRY_JITTER_RATIO)?,
        };

        let upstream = UpstreamSettings {
            user_agent: var("UPSTREAM_USER_AGENT").unwrap_or_else(|| UPSTREAM_USER_AGENT.to_string()),
            referer: var("UPSTREAM_REFERER").unwrap_or_else(|| UPSTREAM_REFERER.to_string()),
            cookie: var("UPSTREAM_COOKIE"),
            proxy: var("UPSTREAM_PROXY"),
            timeout: Duration::from_secs(parse_or(
                var("UPSTREAM_TIMEOUT_SECS"),
                "UPSTREAM_TIMEOUT_SECS",
                UPSTREAM_TIMEOUT_SECS,
            )?),
        };

        let chunk_fanout: usize = parse_or(var("CHUNK_FANOUT"), "CHUNK_FANOUT", CHUNK_FANOUT)?;

        let config = IngestConfig {
            environment,
            log_json: var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            rate_limit_per_second: parse_or(
                var("RATE_LIMIT_PER_SECOND"),
                "RATE_LIMIT_PER_SECOND",
                RATE_LIMIT_PER_SECOND,
            )?,
            rate_limit_burst: parse_or(var("RATE_LIMIT_BURST"), "RATE_LIMIT_BURST", RATE_LIMIT_BURST)?,
            max_workers: parse_or(
                var("WORKER_MAX_CONCURRENT"),
                "WORKER_MAX_CONCURRENT",
                WORKER_MAX_CONCURRENT,
            )?,
            max_per_creator: parse_or(
                var("WORKER_MAX_PER_CREATOR"),
                "WORKER_MAX_PER_CREATOR",
                WORKER_MAX_PER_CREATOR,
            )?,
            chunk_size_bytes: parse_or(var("CHUNK_SIZE_BYTES"), "CHUNK_SIZE_BYTES", CHUNK_SIZE_BYTES)?,
            chunk_fanout: chunk_fanout.clamp(1, MAX_CHUNK_FANOUT),
            staging_dir: var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/staging")),
            retry,
            job_retention: Duration::from_secs(parse_or(
                var("JOB_RETENTION_SECS"),
                "JOB_RETENTION_SECS",
                JOB_RETENTION_SECS,
            )?),
            upstream,
            storage_backend,
            s3_bucket: var("S3_BUCKET").or_else(|| var("R2_BUCKET_NAME")),
            s3_region: var("S3_REGION")
                .or_else(|| var("AWS_REGION"))
                .unwrap_or_else(|| "auto".to_string()),
            s3_endpoint,
            s3_access_key_id: var("R2_ACCESS_KEY_ID").or_else(|| var("AWS_ACCESS_KEY_ID")),
            s3_secret_access_key: var("R2_SECRET_ACCESS_KEY")
                .or_else(|| var("AWS_SECRET_ACCESS_KEY")),
            s3_archive_storage_class: var("S3_ARCHIVE_STORAGE_CLASS")
                .unwrap_or_else(|| "STANDARD_IA".to_string()),
            local_storage_path: var("LOCAL_STORAGE_PATH").map(PathBuf::from),
            retention_policy_path: var("RETENTION_POLICY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/retention.json")),
            audit_log_path: var("AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/audit.log")),
            lifecycle_interval: Duration::from_secs(parse_or(
                var("LIFECYCLE_INTERVAL_SECS"),
                "LIFECYCLE_INTERVAL_SECS",
                LIFECYCLE_INTERVAL_SECS,
            )?),
            lifecycle_concurrency: parse_or(
                var("LIFECYCLE_CONCURRENCY"),
                "LIFECYCLE_CONCURRENCY",
                LIFECYCLE_CONCURRENCY,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.rate_limit_per_second == 0 {
            return Err(anyhow::anyhow!("RATE_LIMIT_PER_SECOND must be at least 1"));
        }
        if self.rate_limit_burst == 0 {
            return Err(anyhow::anyhow!("RATE_LIMIT_BURST must be at least 1"));
        }
        if self.rate_limit_burst > self.rate_limit_per_second {
            return Err(anyhow::anyhow!(
                "RATE_LIMIT_BURST ({}) must not exceed RATE_LIMIT_PER_SECOND ({})",
                self.rate_limit_burst,
                self.rate_limit_per_second
            ));
        }
        if self.max_workers == 0 || self.max_per_creator == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_MAX_CONCURRENT and WORKER_MAX_PER_CREATOR must be at least 1"
            ));
        }
        if self.chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("CHUNK_SIZE_BYTES must be greater than 0"));
        }
        if self.lifecycle_concurrency == 0 {
            return Err(anyhow::anyhow!("LIFECYCLE_CONCURRENCY must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(anyhow::anyhow!("RETRY_JITTER_RATIO must be between 0 and 1"));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET (or R2_BUCKET_NAME) must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
        }

        Ok(())
    }
}
