use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use super::object::StoredObject;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditActor {
    Lifecycle,
    Upload,
}

impl Display for AuditActor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AuditActor::Lifecycle => write!(f, "lifecycle"),
            AuditActor::Upload => write!(f, "upload"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Upload,
    Transition,
    Delete,
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AuditAction::Upload => write!(f, "upload"),
            AuditAction::Transition => write!(f, "transition"),
            AuditAction::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl Display for AuditStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AuditStatus::Success => write!(f, "success"),
            AuditStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One append-only audit record.
///
/// Displays in the fixed line format
/// `<timestamp> [R2-AUDIT] user=<actor> action=<action> object_key=<key> metadata_size=<size> status=<status>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: AuditActor,
    pub action: AuditAction,
    pub object_key: String,
    pub size: u64,
    pub status: AuditStatus,
}

impl AuditEntry {
    /// Entry about `object`, never timestamped before the object was created.
    pub fn for_object(
        object: &StoredObject,
        actor: AuditActor,
        action: AuditAction,
        status: AuditStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: now.max(object.created_at),
            actor,
            action,
            object_key: object.object_key.clone(),
            size: object.size,
            status,
        }
    }
}

impl Display for AuditEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{} [R2-AUDIT] user={} action={} object_key={} metadata_size={} status={}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.actor,
            self.action,
            self.object_key,
            self.size,
            self.status
        )
    }
}
