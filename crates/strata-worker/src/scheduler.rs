//! Job scheduler and worker pool.
//!
//! A single coordinator task owns the queue and the concurrency counters, so
//! the global worker limit and the per-creator limit are enforced without
//! locks. Submitters, workers and cancel requests talk to it over a channel.
//! Job state lives in a shared registry that status queries read directly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use strata_core::{
    IngestConfig, IngestError, IngestResult, Job, JobId, JobStatus, TaskFailure,
};
use strata_storage::object_key;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::pipeline::{TaskPipeline, TaskReporter};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tasks running at once across all jobs
    pub max_workers: usize,
    /// Tasks running at once for a single creator
    pub max_per_creator: usize,
    /// How long finished jobs stay queryable
    pub job_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            max_per_creator: 2,
            job_retention: Duration::from_secs(3600),
        }
    }
}

impl From<&IngestConfig> for SchedulerConfig {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            max_per_creator: config.max_per_creator,
            job_retention: config.job_retention,
        }
    }
}

struct JobEntry {
    job: Job,
    tasks: Vec<TaskReporter>,
    cancel: CancellationToken,
    finished_at: Mutex<Option<Instant>>,
    changed: Notify,
}

impl JobEntry {
    fn new(job: Job, cancel: CancellationToken) -> Self {
        let tasks = job.media.iter().cloned().map(TaskReporter::new).collect();
        Self {
            job,
            tasks,
            cancel,
            finished_at: Mutex::new(None),
            changed: Notify::new(),
        }
    }

    fn status(&self) -> JobStatus {
        let snapshots: Vec<_> = self.tasks.iter().map(TaskReporter::snapshot).collect();
        JobStatus::aggregate(&self.job, &snapshots, self.cancel.is_cancelled())
    }

    fn finished_at(&self) -> MutexGuard<'_, Option<Instant>> {
        self.finished_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called whenever one of the job's tasks reaches a terminal state.
    fn task_settled(&self) {
        let status = self.status();
        if status.is_finished() {
            let mut finished_at = self.finished_at();
            if finished_at.is_none() {
                *finished_at = Some(Instant::now());
                tracing::info!(
                    job_id = %self.job.id,
                    state = %status.state,
                    stored = status.counts.stored,
                    failed = status.counts.failed,
                    canceled = status.counts.canceled,
                    "Job finished"
                );
            }
        }
        self.changed.notify_waiters();
    }
}

struct QueuedTask {
    entry: Arc<JobEntry>,
    index: usize,
    creator_id: String,
}

impl QueuedTask {
    fn reporter(&self) -> &TaskReporter {
        &self.entry.tasks[self.index]
    }
}

enum Command {
    Enqueue(Vec<QueuedTask>),
    Finished { creator_id: String },
    Cancel(JobId),
}

#[derive(Default)]
struct Registry {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    /// Object keys currently owned by a non-terminal task
    in_flight: Mutex<HashMap<String, JobId>>,
}

impl Registry {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, JobId>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, reporter: &TaskReporter, job_id: JobId) {
        let key = object_key(&reporter.media());
        let mut in_flight = self.in_flight();
        if in_flight.get(&key) == Some(&job_id) {
            in_flight.remove(&key);
        }
    }

    async fn get(&self, job_id: JobId) -> IngestResult<Arc<JobEntry>> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| IngestError::JobNotFound(job_id.to_string()))
    }

    async fn reap(&self, retention: Duration) {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| match *entry.finished_at() {
            Some(finished) => finished.elapsed() < retention,
            None => true,
        });
        let reaped = before - jobs.len();
        if reaped > 0 {
            tracing::debug!(reaped, remaining = jobs.len(), "Reaped finished jobs");
        }
    }
}

/// Accepts jobs and runs their tasks under the configured concurrency limits.
///
/// Must be created inside a Tokio runtime.
pub struct Scheduler {
    registry: Arc<Registry>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, pipeline: Arc<dyn TaskPipeline>) -> Self {
        let registry = Arc::new(Registry::default());
        let shutdown = CancellationToken::new();
        let (commands, receiver) = mpsc::unbounded_channel();

        tracing::info!(
            max_workers = config.max_workers,
            max_per_creator = config.max_per_creator,
            job_retention_secs = config.job_retention.as_secs(),
            "Starting ingestion scheduler"
        );

        let coordinator = Coordinator {
            max_workers: config.max_workers.max(1),
            max_per_creator: config.max_per_creator.max(1),
            pipeline,
            registry: registry.clone(),
            commands: commands.clone(),
            queue: VecDeque::new(),
            running: 0,
            per_creator: HashMap::new(),
        };
        tokio::spawn(coordinator.run(receiver, shutdown.clone()));
        tokio::spawn(reap_loop(
            registry.clone(),
            config.job_retention,
            shutdown.clone(),
        ));

        Self {
            registry,
            commands,
            shutdown,
        }
    }

    /// Register `job` and queue one task per distinct media reference.
    ///
    /// Media already being ingested by another job are skipped. Fails with
    /// `EmptyJob` for a job without media and `DuplicateInFlight` when every
    /// reference was skipped.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, creator_id = %job.creator_id))]
    pub async fn submit(&self, job: Job) -> IngestResult<JobId> {
        if job.media.is_empty() {
            return Err(IngestError::EmptyJob);
        }
        if self.shutdown.is_cancelled() {
            return Err(IngestError::Canceled);
        }

        let job_id = job.id;
        let requested = job.media.len();
        let mut accepted = Vec::with_capacity(requested);
        {
            let mut in_flight = self.registry.in_flight();
            let mut seen = HashSet::new();
            for media in job.media.iter() {
                let key = object_key(media);
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Some(owner) = in_flight.get(&key) {
                    tracing::debug!(object_key = %key, owner = %owner, "Media already in flight, skipping");
                    continue;
                }
                accepted.push((key, media.clone()));
            }

            if accepted.is_empty() {
                return Err(IngestError::DuplicateInFlight(job_id.to_string()));
            }
            for (key, _) in &accepted {
                in_flight.insert(key.clone(), job_id);
            }
        }

        let job = Job {
            media: accepted.into_iter().map(|(_, media)| media).collect(),
            ..job
        };
        let entry = Arc::new(JobEntry::new(job, self.shutdown.child_token()));
        self.registry
            .jobs
            .write()
            .await
            .insert(job_id, entry.clone());

        let queued: Vec<_> = entry
            .tasks
            .iter()
            .enumerate()
            .map(|(index, reporter)| QueuedTask {
                entry: entry.clone(),
                index,
                creator_id: reporter.media().creator_id,
            })
            .collect();
        let tasks = queued.len();

        if self.commands.send(Command::Enqueue(queued)).is_err() {
            for reporter in &entry.tasks {
                self.registry.release(reporter, job_id);
            }
            self.registry.jobs.write().await.remove(&job_id);
            return Err(IngestError::Canceled);
        }

        tracing::info!(
            tasks,
            skipped = requested - tasks,
            content_type = %entry.job.content_type,
            "Job submitted"
        );
        Ok(job_id)
    }

    pub async fn status(&self, job_id: JobId) -> IngestResult<JobStatus> {
        Ok(self.registry.get(job_id).await?.status())
    }

    /// Stop dispatching the job's queued tasks and signal its running ones.
    ///
    /// Canceling a finished job is a no-op.
    pub async fn cancel(&self, job_id: JobId) -> IngestResult<()> {
        let entry = self.registry.get(job_id).await?;
        if entry.status().is_finished() {
            return Ok(());
        }
        entry.cancel.cancel();
        tracing::info!(job_id = %job_id, "Job cancel requested");
        // A stopped coordinator already canceled everything it held
        let _ = self.commands.send(Command::Cancel(job_id));
        Ok(())
    }

    /// Wait until every task of the job is terminal and return the final status.
    pub async fn wait(&self, job_id: JobId) -> IngestResult<JobStatus> {
        let entry = self.registry.get(job_id).await?;
        loop {
            let changed = entry.changed.notified();
            let status = entry.status();
            if status.is_finished() {
                return Ok(status);
            }
            changed.await;
        }
    }

    /// Stop accepting work and cancel every queued and running task.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down ingestion scheduler");
        self.shutdown.cancel();
    }
}

struct Coordinator {
    max_workers: usize,
    max_per_creator: usize,
    pipeline: Arc<dyn TaskPipeline>,
    registry: Arc<Registry>,
    commands: mpsc::UnboundedSender<Command>,
    queue: VecDeque<QueuedTask>,
    running: usize,
    per_creator: HashMap<String, usize>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut receiver: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = receiver.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
            self.purge_canceled();
            self.dispatch();
        }

        self.purge_canceled();
        tracing::info!(running = self.running, "Scheduler coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue(tasks) => self.queue.extend(tasks),
            Command::Finished { creator_id } => {
                self.running = self.running.saturating_sub(1);
                if let Some(count) = self.per_creator.get_mut(&creator_id) {
                    *count -= 1;
                    if *count == 0 {
                        self.per_creator.remove(&creator_id);
                    }
                }
            }
            Command::Cancel(job_id) => {
                tracing::debug!(job_id = %job_id, "Dropping queued tasks of canceled job");
            }
        }
    }

    /// Drop queued tasks whose job was canceled, marking them `Canceled`.
    fn purge_canceled(&mut self) {
        let mut settled = Vec::new();
        self.queue.retain(|task| {
            if !task.entry.cancel.is_cancelled() {
                return true;
            }
            task.reporter().cancel();
            settled.push((task.entry.clone(), task.index));
            false
        });
        for (entry, index) in settled {
            self.registry.release(&entry.tasks[index], entry.job.id);
            entry.task_settled();
        }
    }

    /// Start queued tasks in FIFO order, skipping creators at their limit.
    fn dispatch(&mut self) {
        while self.running < self.max_workers {
            let Some(position) = self.queue.iter().position(|task| {
                self.per_creator.get(&task.creator_id).copied().unwrap_or(0) < self.max_per_creator
            }) else {
                break;
            };
            let Some(task) = self.queue.remove(position) else {
                break;
            };

            self.running += 1;
            *self.per_creator.entry(task.creator_id.clone()).or_default() += 1;
            self.spawn_worker(task);
        }
    }

    fn spawn_worker(&self, task: QueuedTask) {
        let pipeline = self.pipeline.clone();
        let registry = self.registry.clone();
        let commands = self.commands.clone();

        tokio::spawn(async move {
            let reporter = task.reporter().clone();
            let cancel = task.entry.cancel.clone();
            let job_id = task.entry.job.id;

            // A panicking pipeline only takes down the inner task
            let worker = tokio::spawn(run_task(pipeline, reporter.clone(), cancel, job_id));
            if let Err(e) = worker.await {
                if e.is_panic() {
                    let message = panic_message(e.into_panic());
                    tracing::error!(
                        job_id = %job_id,
                        url = %reporter.media().source_url,
                        panic = %message,
                        "Worker panicked"
                    );
                    reporter.fail(TaskFailure {
                        code: "worker_panic".to_string(),
                        message,
                    });
                } else {
                    reporter.cancel();
                }
            }

            registry.release(&reporter, job_id);
            task.entry.task_settled();
            let _ = commands.send(Command::Finished {
                creator_id: task.creator_id,
            });
        });
    }
}

#[tracing::instrument(skip_all, fields(job_id = %job_id))]
async fn run_task(
    pipeline: Arc<dyn TaskPipeline>,
    reporter: TaskReporter,
    cancel: CancellationToken,
    job_id: JobId,
) {
    if cancel.is_cancelled() {
        reporter.cancel();
        return;
    }

    match pipeline.run(&reporter, &cancel).await {
        Ok(object) => reporter.complete(&object),
        Err(e) if e.is_canceled() || cancel.is_cancelled() => {
            tracing::info!(url = %reporter.media().source_url, "Task canceled");
            reporter.cancel();
        }
        Err(e) => {
            tracing::warn!(
                url = %reporter.media().source_url,
                error = %e,
                error_code = e.error_code(),
                attempts = reporter.snapshot().attempt_count,
                "Task failed"
            );
            reporter.fail(TaskFailure::from(&e));
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "worker panicked".to_string()
}

async fn reap_loop(registry: Arc<Registry>, retention: Duration, shutdown: CancellationToken) {
    let period = (retention / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => registry.reap(retention).await,
        }
    }
}
