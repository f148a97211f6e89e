use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::content::ContentType;
use super::task::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One downloadable unit of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
    pub content_type: ContentType,
    pub creator_id: String,
}

impl MediaReference {
    pub fn new(
        creator_id: impl Into<String>,
        content_type: ContentType,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            expected_size: None,
            content_type,
            creator_id: creator_id.into(),
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Number of chunks of `chunk_size` bytes, when the size is known up front.
    pub fn chunk_count(&self, chunk_size: u64) -> Option<u64> {
        if chunk_size == 0 {
            return None;
        }
        self.expected_size.map(|size| size.div_ceil(chunk_size))
    }
}

/// A unit of ingestion work for one creator and content batch.
///
/// Immutable once created; the scheduler expands it into transfer tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub creator_id: String,
    pub content_type: ContentType,
    pub media: Vec<MediaReference>,
    pub requested_at: DateTime<Utc>,
}

impl Job {
    /// Build a job from source URLs of unknown size.
    pub fn new<I, S>(creator_id: impl Into<String>, content_type: ContentType, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let creator_id = creator_id.into();
        let media = urls
            .into_iter()
            .map(|url| MediaReference::new(creator_id.clone(), content_type, url))
            .collect();
        Self::with_media(creator_id, content_type, media)
    }

    pub fn with_media(
        creator_id: impl Into<String>,
        content_type: ContentType,
        media: Vec<MediaReference>,
    ) -> Self {
        Self {
            id: JobId::new(),
            creator_id: creator_id.into(),
            content_type,
            media,
            requested_at: Utc::now(),
        }
    }

    /// Build a follow-up job containing only the media that failed in `status`.
    ///
    /// Returns `None` when nothing failed.
    pub fn retry_of(status: &JobStatus) -> Option<Self> {
        let media = status.failed_media();
        if media.is_empty() {
            return None;
        }
        Some(Self::with_media(
            status.creator_id.clone(),
            status.content_type,
            media,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        let media = MediaReference::new("c1", ContentType::Post, "https://cdn/x.mp4")
            .with_expected_size(5 * 1024 * 1024 + 1);
        assert_eq!(media.chunk_count(1024 * 1024), Some(6));
        assert_eq!(media.chunk_count(0), None);

        let unknown = MediaReference::new("c1", ContentType::Post, "https://cdn/y.mp4");
        assert_eq!(unknown.chunk_count(1024), None);
    }

    #[test]
    fn job_new_tags_every_reference() {
        let job = Job::new("creator-9", ContentType::Story, ["a", "b"]);
        assert_eq!(job.media.len(), 2);
        assert!(job
            .media
            .iter()
            .all(|m| m.creator_id == "creator-9" && m.content_type == ContentType::Story));
    }

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
