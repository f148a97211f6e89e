//! Strata CLI: ingest creator media into tiered storage and manage its lifecycle.
//!
//! Configuration comes from the environment (and `.env`); see `IngestConfig`.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use strata_cli::{load_job, AppContext};
use strata_core::{ContentType, IngestConfig, Job, JobState, RetentionPolicy};
use strata_infra::{init_telemetry, shutdown_telemetry};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "strata", about = "Content ingestion and tiered storage lifecycle")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download media and store it, waiting until the job finishes
    Ingest {
        /// Creator the media belongs to
        #[arg(long, required_unless_present = "job_file")]
        creator: Option<String>,
        /// Content type: post, livestream or story
        #[arg(long, required_unless_present = "job_file")]
        content_type: Option<ContentType>,
        /// JSON job document instead of --creator/--content-type/URLs
        #[arg(long, conflicts_with_all = ["creator", "content_type", "urls"])]
        job_file: Option<PathBuf>,
        /// Source URLs
        urls: Vec<String>,
    },
    /// Run a single lifecycle sweep
    Sweep {
        /// Print planned actions without executing them
        #[arg(long)]
        dry_run: bool,
        /// Evaluate the policy as of this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Run lifecycle sweeps periodically until interrupted
    Lifecycle,
    /// Validate a retention policy document
    CheckPolicy {
        /// Path to the policy JSON
        path: PathBuf,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

fn load_config() -> anyhow::Result<IngestConfig> {
    let config = IngestConfig::from_env().context("Invalid configuration")?;
    init_telemetry(config.log_json)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;
    tracing::info!(
        environment = %config.environment,
        storage_backend = %config.storage_backend,
        "Configuration loaded"
    );
    Ok(config)
}

async fn ingest(context: &AppContext, job: Job) -> anyhow::Result<()> {
    let scheduler = context.scheduler()?;
    let job_id = scheduler.submit(job).await.context("Job rejected")?;

    let status = tokio::select! {
        status = scheduler.wait(job_id) => status?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(job_id = %job_id, "Interrupted, canceling job");
            scheduler.cancel(job_id).await?;
            scheduler.wait(job_id).await?
        }
    };
    scheduler.shutdown();

    print_json(&status)?;
    if status.state != JobState::Completed {
        anyhow::bail!("Job {} finished as {}", job_id, status.state);
    }
    Ok(())
}

async fn run_lifecycle(context: &AppContext) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let manager = Arc::new(context.lifecycle());
    let handle = manager.start(context.config.lifecycle_interval, shutdown.clone());

    tracing::info!(
        interval_secs = context.config.lifecycle_interval.as_secs(),
        "Lifecycle manager running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    shutdown.cancel();
    handle.await.context("Lifecycle task failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckPolicy { path } => {
            let policy = RetentionPolicy::load(&path)
                .with_context(|| format!("Invalid retention policy {}", path.display()))?;
            print_json(&policy.rules().collect::<Vec<_>>())?;
            return Ok(());
        }
        Commands::Ingest {
            creator,
            content_type,
            job_file,
            urls,
        } => {
            let job = match job_file {
                Some(path) => load_job(&path)?,
                None => {
                    let creator = creator.context("--creator is required")?;
                    let content_type = content_type.context("--content-type is required")?;
                    Job::new(creator, content_type, urls)
                }
            };
            let context = AppContext::build(load_config()?).await?;
            ingest(&context, job).await?;
        }
        Commands::Sweep { dry_run, at } => {
            let context = AppContext::build(load_config()?).await?;
            let manager = context.lifecycle();
            let now = at.unwrap_or_else(Utc::now);
            if dry_run {
                let planned = manager.preview(now).await.context("Failed to plan sweep")?;
                print_json(&planned)?;
            } else {
                let summary = manager.sweep(now).await;
                print_json(&summary)?;
            }
        }
        Commands::Lifecycle => {
            let context = AppContext::build(load_config()?).await?;
            run_lifecycle(&context).await?;
        }
    }

    shutdown_telemetry().await;
    Ok(())
}
