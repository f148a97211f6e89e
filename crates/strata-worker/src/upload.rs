use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use strata_core::{
    AuditAction, AuditActor, AuditEntry, AuditStatus, IngestError, IngestResult, MediaReference,
    ObjectTags, RetentionPolicy, StoredObject,
};
use strata_infra::{AuditLogger, RetryError, RetryPolicy};
use strata_storage::{detect_mime_type, object_key, ObjectStore};
use tokio_util::sync::CancellationToken;

/// Moves staged files into object storage under their deterministic key.
#[derive(Clone)]
pub struct StorageUploader {
    store: Arc<dyn ObjectStore>,
    policy: Arc<RetentionPolicy>,
    retry: RetryPolicy,
    audit: AuditLogger,
}

impl StorageUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        policy: Arc<RetentionPolicy>,
        retry: RetryPolicy,
        audit: AuditLogger,
    ) -> Self {
        Self {
            store,
            policy,
            retry,
            audit,
        }
    }

    /// Upload the file at `staging_path` as the object for `media`.
    ///
    /// The object lands in the initial storage class of its content type.
    /// Uploading the same media again overwrites the object.
    #[tracing::instrument(skip(self, staging_path, media, cancel), fields(creator_id = %media.creator_id))]
    pub async fn store(
        &self,
        staging_path: &Path,
        media: &MediaReference,
        cancel: &CancellationToken,
    ) -> IngestResult<StoredObject> {
        let key = object_key(media);
        let storage_class = self.policy.initial_storage_class(media.content_type);
        let tags = ObjectTags {
            content_type: media.content_type,
            creator_id: media.creator_id.clone(),
            mime_type: detect_mime_type(&media.source_url).to_string(),
            source_url: Some(media.source_url.clone()),
            created_at: Utc::now(),
            last_transition_at: None,
        };

        let (store, key_ref, tags_ref) = (&self.store, &key, &tags);
        let result = self
            .retry
            .run("upload", cancel, move |_| async move {
                store
                    .put_file(key_ref, staging_path, tags_ref, storage_class)
                    .await
                    .map_err(IngestError::from)
            })
            .await;

        let size = match result {
            Ok(size) => size,
            Err(RetryError::Canceled) => return Err(IngestError::Canceled),
            Err(e) => {
                let size = tokio::fs::metadata(staging_path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                let object = StoredObject::from_tags(&key, tags, storage_class, size);
                self.audit(&object, AuditStatus::Failed).await;
                return Err(IngestError::Upload(format!("{}: {}", key, e)));
            }
        };

        let object = StoredObject::from_tags(&key, tags, storage_class, size);
        self.audit(&object, AuditStatus::Success).await;

        tracing::info!(
            object_key = %object.object_key,
            size_bytes = object.size,
            storage_class = %object.storage_class,
            "Media stored"
        );
        Ok(object)
    }

    async fn audit(&self, object: &StoredObject, status: AuditStatus) {
        let entry = AuditEntry::for_object(
            object,
            AuditActor::Upload,
            AuditAction::Upload,
            status,
            Utc::now(),
        );
        // The object is stored either way; a lost audit line is only logged
        if let Err(e) = self.audit.record(&entry).await {
            tracing::warn!(error = %e, object_key = %object.object_key, "Upload audit entry lost");
        }
    }
}
