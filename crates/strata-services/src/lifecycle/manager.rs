use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    AuditAction, AuditActor, AuditEntry, AuditStatus, ContentType, RetentionPolicy, StorageClass,
    StoredObject,
};
use strata_infra::AuditLogger;
use strata_storage::{ObjectStore, StorageError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::plan::{plan, LifecycleAction};

/// One object the sweep could not handle.
#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub object_key: String,
    pub operation: &'static str,
    pub error: String,
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub scanned: usize,
    pub transitioned: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Objects that vanished between listing and acting on them.
    pub missing: usize,
    pub failed: Vec<SweepFailure>,
    pub duration_ms: u64,
}

impl SweepSummary {
    pub fn succeeded(&self) -> usize {
        self.transitioned + self.deleted
    }

    fn record(&mut self, outcome: ObjectOutcome) {
        if !matches!(outcome, ObjectOutcome::ListFailed(_)) {
            self.scanned += 1;
        }
        match outcome {
            ObjectOutcome::Unchanged => self.unchanged += 1,
            ObjectOutcome::Transitioned => self.transitioned += 1,
            ObjectOutcome::Deleted => self.deleted += 1,
            ObjectOutcome::Missing => self.missing += 1,
            ObjectOutcome::Failed(failure) | ObjectOutcome::ListFailed(failure) => {
                self.failed.push(failure)
            }
        }
    }
}

/// Action a sweep at a given instant would take on one object.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    pub object_key: String,
    pub content_type: ContentType,
    pub storage_class: StorageClass,
    pub age_days: i64,
    #[serde(flatten)]
    pub action: LifecycleAction,
}

enum ObjectOutcome {
    Unchanged,
    Transitioned,
    Deleted,
    Missing,
    Failed(SweepFailure),
    ListFailed(SweepFailure),
}

fn failure(object_key: &str, operation: &'static str, error: impl ToString) -> SweepFailure {
    SweepFailure {
        object_key: object_key.to_string(),
        operation,
        error: error.to_string(),
    }
}

/// Applies the retention policy to stored objects.
pub struct LifecycleManager {
    store: Arc<dyn ObjectStore>,
    policy: Arc<RetentionPolicy>,
    audit: AuditLogger,
    concurrency: usize,
    // Sweeps never overlap, so each object has a single writer
    sweep_lock: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        policy: Arc<RetentionPolicy>,
        audit: AuditLogger,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            policy,
            audit,
            concurrency: concurrency.max(1),
            sweep_lock: Mutex::new(()),
        }
    }

    /// Key prefixes worth scanning: one per content type with a rule.
    fn prefixes(&self) -> Vec<String> {
        self.policy
            .rules()
            .map(|rule| format!("{}/", rule.content_type.key_prefix()))
            .collect()
    }

    /// Run one sweep as of `now`.
    ///
    /// Per-object failures are collected in the summary and never abort the
    /// sweep. A concurrent call waits for the running sweep to finish.
    #[tracing::instrument(skip(self), fields(lifecycle.operation = "sweep"))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepSummary {
        let _guard = self.sweep_lock.lock().await;
        let start = std::time::Instant::now();

        let mut summary = SweepSummary::default();
        for prefix in self.prefixes() {
            let mut outcomes = self
                .store
                .list(&prefix)
                .map(|key| self.process(key, &prefix, now))
                .buffer_unordered(self.concurrency);
            while let Some(outcome) = outcomes.next().await {
                summary.record(outcome);
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            scanned = summary.scanned,
            transitioned = summary.transitioned,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            missing = summary.missing,
            failed = summary.failed.len(),
            duration_ms = summary.duration_ms,
            "Lifecycle sweep completed"
        );
        summary
    }

    /// Actions a sweep at `now` would take, without executing them.
    pub async fn preview(&self, now: DateTime<Utc>) -> Result<Vec<PlannedAction>, StorageError> {
        let mut planned = Vec::new();
        for prefix in self.prefixes() {
            let mut keys = self.store.list(&prefix);
            while let Some(key) = keys.next().await {
                let key = key?;
                let object = match self.store.get_metadata(&key).await {
                    Ok(object) => object,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                };
                planned.push(PlannedAction {
                    action: plan(&object, &self.policy, now),
                    age_days: object.age_days(now),
                    object_key: object.object_key,
                    content_type: object.content_type,
                    storage_class: object.storage_class,
                });
            }
        }
        Ok(planned)
    }

    /// Start sweeping every `interval` until `shutdown` fires.
    pub fn start(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Lifecycle manager stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        tracing::info!("Starting scheduled lifecycle sweep");
                        let summary = self.sweep(Utc::now()).await;
                        if !summary.failed.is_empty() {
                            tracing::warn!(
                                failed = summary.failed.len(),
                                "Lifecycle sweep finished with failures"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Boxed so the sweep future stays `Send` for the periodic runner.
    fn process<'a>(
        &'a self,
        key: Result<String, StorageError>,
        prefix: &'a str,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, ObjectOutcome> {
        async move {
            match key {
                Ok(key) => self.apply(&key, now).await,
                Err(e) => {
                    tracing::error!(error = %e, prefix = %prefix, "Failed to list objects");
                    ObjectOutcome::ListFailed(failure(prefix, "list", e))
                }
            }
        }
        .boxed()
    }

    async fn apply(&self, key: &str, now: DateTime<Utc>) -> ObjectOutcome {
        let object = match self.store.get_metadata(key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return ObjectOutcome::Missing,
            Err(e) => {
                tracing::error!(error = %e, object_key = %key, "Failed to read object metadata");
                return ObjectOutcome::Failed(failure(key, "inspect", e));
            }
        };

        match plan(&object, &self.policy, now) {
            LifecycleAction::Keep => ObjectOutcome::Unchanged,
            LifecycleAction::Transition { target } => {
                match self.store.set_storage_class(key, target, now).await {
                    Ok(()) => {
                        tracing::info!(
                            object_key = %key,
                            from = %object.storage_class,
                            to = %target,
                            age_days = object.age_days(now),
                            "Object transitioned"
                        );
                        self.audit(&object, AuditAction::Transition, AuditStatus::Success, now)
                            .await;
                        ObjectOutcome::Transitioned
                    }
                    Err(e) if e.is_not_found() => ObjectOutcome::Missing,
                    Err(e) => {
                        tracing::error!(error = %e, object_key = %key, "Failed to transition object");
                        self.audit(&object, AuditAction::Transition, AuditStatus::Failed, now)
                            .await;
                        ObjectOutcome::Failed(failure(key, "transition", e))
                    }
                }
            }
            LifecycleAction::Delete => match self.store.delete(key).await {
                Ok(()) => {
                    tracing::info!(
                        object_key = %key,
                        age_days = object.age_days(now),
                        "Object deleted"
                    );
                    self.audit(&object, AuditAction::Delete, AuditStatus::Success, now)
                        .await;
                    ObjectOutcome::Deleted
                }
                Err(e) => {
                    tracing::error!(error = %e, object_key = %key, "Failed to delete object");
                    self.audit(&object, AuditAction::Delete, AuditStatus::Failed, now)
                        .await;
                    ObjectOutcome::Failed(failure(key, "delete", e))
                }
            },
        }
    }

    async fn audit(
        &self,
        object: &StoredObject,
        action: AuditAction,
        status: AuditStatus,
        now: DateTime<Utc>,
    ) {
        let entry = AuditEntry::for_object(object, AuditActor::Lifecycle, action, status, now);
        if let Err(e) = self.audit.record(&entry).await {
            tracing::warn!(error = %e, object_key = %object.object_key, "Lifecycle audit entry lost");
        }
    }
}
