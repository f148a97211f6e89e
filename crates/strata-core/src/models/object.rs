use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::content::{ContentType, StorageClass};
use crate::error::IngestError;

/// User-metadata keys written on every stored object.
pub mod tags {
    pub const CONTENT_CATEGORY: &str = "content-category";
    pub const CREATOR_ID: &str = "creator-id";
    pub const CREATED_AT: &str = "created-at";
    pub const SOURCE: &str = "source";
    pub const SOURCE_URL: &str = "source-url";
    pub const MIME_TYPE: &str = "mime-type";
    pub const LAST_TRANSITION_AT: &str = "last-transition-at";
}

/// Upstream platform name recorded in the `source` tag.
pub const SOURCE_PLATFORM: &str = "douyin";

/// Metadata attached to an object at upload time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTags {
    pub content_type: ContentType,
    pub creator_id: String,
    pub mime_type: String,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_at: Option<DateTime<Utc>>,
}

impl ObjectTags {
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            tags::CONTENT_CATEGORY.to_string(),
            self.content_type.to_string(),
        );
        map.insert(tags::CREATOR_ID.to_string(), self.creator_id.clone());
        map.insert(tags::CREATED_AT.to_string(), self.created_at.to_rfc3339());
        map.insert(tags::SOURCE.to_string(), SOURCE_PLATFORM.to_string());
        map.insert(tags::MIME_TYPE.to_string(), self.mime_type.clone());
        if let Some(ref url) = self.source_url {
            map.insert(tags::SOURCE_URL.to_string(), url.clone());
        }
        if let Some(at) = self.last_transition_at {
            map.insert(tags::LAST_TRANSITION_AT.to_string(), at.to_rfc3339());
        }
        map
    }

    /// Parse tags back from backend metadata.
    ///
    /// Objects without a content category were not written by the uploader and
    /// are rejected so the lifecycle sweep never acts on foreign objects.
    pub fn from_metadata(
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Self, IngestError> {
        let content_type = metadata
            .get(tags::CONTENT_CATEGORY)
            .ok_or_else(|| {
                IngestError::Storage(format!("object {} has no {} tag", key, tags::CONTENT_CATEGORY))
            })?
            .parse::<ContentType>()
            .map_err(|e| IngestError::Storage(format!("object {}: {}", key, e)))?;

        let created_at = metadata
            .get(tags::CREATED_AT)
            .ok_or_else(|| {
                IngestError::Storage(format!("object {} has no {} tag", key, tags::CREATED_AT))
            })
            .and_then(|raw| parse_timestamp(key, raw))?;

        let last_transition_at = metadata
            .get(tags::LAST_TRANSITION_AT)
            .map(|raw| parse_timestamp(key, raw))
            .transpose()?;

        Ok(Self {
            content_type,
            creator_id: metadata
                .get(tags::CREATOR_ID)
                .cloned()
                .unwrap_or_default(),
            mime_type: metadata
                .get(tags::MIME_TYPE)
                .cloned()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            source_url: metadata.get(tags::SOURCE_URL).cloned(),
            created_at,
            last_transition_at,
        })
    }
}

fn parse_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>, IngestError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IngestError::Storage(format!("object {} has bad timestamp {}: {}", key, raw, e)))
}

/// An object persisted in tiered storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub object_key: String,
    pub content_type: ContentType,
    pub creator_id: String,
    pub storage_class: StorageClass,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub size: u64,
    pub mime_type: String,
}

impl StoredObject {
    pub fn from_tags(
        object_key: impl Into<String>,
        tags: ObjectTags,
        storage_class: StorageClass,
        size: u64,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            content_type: tags.content_type,
            creator_id: tags.creator_id,
            storage_class,
            created_at: tags.created_at,
            last_transition_at: tags.last_transition_at,
            size,
            mime_type: tags.mime_type,
        }
    }

    /// Whole days elapsed since creation, negative if `created_at` is in the future.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}
