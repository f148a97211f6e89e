use crate::traits::{KeyStream, ObjectStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use strata_core::{ObjectTags, StorageClass, StoredObject};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = ".meta";

/// Metadata kept next to each stored file.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    storage_class: StorageClass,
    tags: ObjectTags,
}

/// Local filesystem storage implementation
///
/// Objects live under `{base}/objects/{key}`, their tags and storage class
/// under `{base}/.meta/{key}.json`. Both are written through a temp file and
/// a rename so readers never observe a partial object.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        for dir in [OBJECTS_DIR, META_DIR] {
            fs::create_dir_all(base_path.join(dir)).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    base_path.display(),
                    e
                ))
            })?;
        }

        Ok(LocalStorage { base_path })
    }

    /// Validate a key and return it as a relative path.
    ///
    /// Keys must be relative and must not contain `..` components, so they can
    /// never resolve outside the storage directory.
    fn validate_key(key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
            return Err(StorageError::InvalidKey(format!("{:?}", key)));
        }
        let relative = PathBuf::from(key);
        let all_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !all_normal {
            return Err(StorageError::InvalidKey(format!(
                "{:?} contains path traversal components",
                key
            )));
        }
        Ok(relative)
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.base_path.join(OBJECTS_DIR).join(Self::validate_key(key)?))
    }

    fn meta_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self
            .base_path
            .join(META_DIR)
            .join(format!("{}.json", Self::validate_key(key)?.display())))
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write `data` to a fresh temp file next to `path` and return its path.
    async fn stage(&self, path: &Path, data: &[u8]) -> StorageResult<PathBuf> {
        self.ensure_parent_dir(path).await?;
        let temp = Self::temp_path_for(path);

        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::UploadFailed(format!(
                "Failed to write file {}: {}",
                temp.display(),
                e
            )));
        }
        Ok(temp)
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let temp = self.stage(path, data).await?;
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::UploadFailed(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }

    async fn write_sidecar(&self, key: &str, sidecar: &Sidecar) -> StorageResult<()> {
        let raw = serde_json::to_vec_pretty(sidecar)
            .map_err(|e| StorageError::InvalidMetadata(format!("{}: {}", key, e)))?;
        self.write_atomic(&self.meta_path(key)?, &raw).await
    }

    async fn read_sidecar(&self, key: &str) -> StorageResult<Sidecar> {
        let path = self.meta_path(key)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(StorageError::IoError(e)),
        };
        serde_json::from_slice(&raw)
            .map_err(|e| StorageError::InvalidMetadata(format!("{}: {}", key, e)))
    }

    /// Directory to start listing from: the deepest directory named by `prefix`.
    fn walk_start(root: &Path, prefix: &str) -> PathBuf {
        let dir = prefix.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let relative = Path::new(dir);
        if relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            root.join(relative)
        } else {
            root.to_path_buf()
        }
    }

    /// Yield the next key of a directory walk, reading one entry at a time.
    async fn next_key(mut walk: KeyWalk) -> StorageResult<Option<(String, KeyWalk)>> {
        loop {
            if walk.entries.is_none() {
                let Some(dir) = walk.pending.pop() else {
                    return Ok(None);
                };
                match fs::read_dir(&dir).await {
                    Ok(entries) => walk.entries = Some(entries),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::IoError(e)),
                }
                continue;
            }
            let Some(entries) = walk.entries.as_mut() else {
                continue;
            };

            let Some(entry) = entries.next_entry().await? else {
                walk.entries = None;
                continue;
            };
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                walk.pending.push(path);
                continue;
            }
            let is_temp = entry
                .file_name()
                .to_str()
                .map(|n| n.starts_with('.') && n.ends_with(".tmp"))
                .unwrap_or(true);
            if is_temp {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&walk.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(&walk.prefix) {
                return Ok(Some((key, walk)));
            }
        }
    }

    /// Write `sidecar`, then move the staged object at `temp` into `path`.
    ///
    /// If the object cannot be moved into place the previous sidecar is
    /// restored, so bytes and tags always belong to the same upload.
    async fn install(
        &self,
        key: &str,
        temp: &Path,
        path: &Path,
        sidecar: &Sidecar,
    ) -> StorageResult<()> {
        let meta = self.meta_path(key)?;
        let previous = match fs::read(&meta).await {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                let _ = fs::remove_file(temp).await;
                return Err(StorageError::IoError(e));
            }
        };

        if let Err(e) = self.write_sidecar(key, sidecar).await {
            let _ = fs::remove_file(temp).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(temp, path).await {
            let _ = fs::remove_file(temp).await;
            let restored = match previous {
                Some(raw) => self.write_atomic(&meta, &raw).await,
                None => fs::remove_file(&meta).await.map_err(StorageError::IoError),
            };
            if let Err(restore_error) = restored {
                tracing::error!(key = %key, error = %restore_error, "Failed to restore object metadata");
            }
            return Err(StorageError::UploadFailed(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }
}

/// State of a lazy, depth-first listing of the objects directory.
struct KeyWalk {
    root: PathBuf,
    prefix: String,
    pending: Vec<PathBuf>,
    entries: Option<fs::ReadDir>,
}

#[async_trait]
impl ObjectStore for LocalStorage {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        tags: &ObjectTags,
        storage_class: StorageClass,
    ) -> StorageResult<()> {
        let path = self.object_path(key)?;
        let start = std::time::Instant::now();

        let temp = self.stage(&path, &data).await?;
        let sidecar = Sidecar {
            storage_class,
            tags: tags.clone(),
        };
        self.install(key, &temp, &path, &sidecar).await?;

        tracing::debug!(
            path = %path.display(),
            key = %key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );
        Ok(())
    }

    async fn put_file(
        &self,
        key: &str,
        source: &Path,
        tags: &ObjectTags,
        storage_class: StorageClass,
    ) -> StorageResult<u64> {
        let path = self.object_path(key)?;
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await?;
        let temp = Self::temp_path_for(&path);
        let size = match fs::copy(source, &temp).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to copy {} into storage: {}",
                    source.display(),
                    e
                )));
            }
        };
        let sidecar = Sidecar {
            storage_class,
            tags: tags.clone(),
        };
        self.install(key, &temp, &path, &sidecar).await?;

        tracing::debug!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put_file successful"
        );
        Ok(size)
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<StoredObject> {
        let path = self.object_path(key)?;
        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(StorageError::IoError(e)),
        };
        let sidecar = self.read_sidecar(key).await?;
        Ok(StoredObject::from_tags(
            key,
            sidecar.tags,
            sidecar.storage_class,
            size,
        ))
    }

    async fn set_storage_class(
        &self,
        key: &str,
        storage_class: StorageClass,
        transitioned_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        if !fs::try_exists(self.object_path(key)?).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let mut sidecar = self.read_sidecar(key).await?;
        sidecar.storage_class = storage_class;
        sidecar.tags.last_transition_at = Some(transitioned_at);
        self.write_sidecar(key, &sidecar).await?;

        tracing::debug!(key = %key, storage_class = %storage_class, "Local storage class changed");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        let meta = self.meta_path(key)?;

        for target in [&path, &meta] {
            match fs::remove_file(target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::DeleteFailed(format!(
                        "Failed to delete file {}: {}",
                        target.display(),
                        e
                    )))
                }
            }
        }

        tracing::debug!(path = %path.display(), key = %key, "Local storage delete successful");
        Ok(())
    }

    fn list(&self, prefix: &str) -> KeyStream {
        let root = self.base_path.join(OBJECTS_DIR);
        let walk = KeyWalk {
            pending: vec![Self::walk_start(&root, prefix)],
            root,
            prefix: prefix.to_string(),
            entries: None,
        };
        stream::try_unfold(walk, Self::next_key).boxed()
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::TryStreamExt;
    use strata_core::ContentType;
    use tempfile::tempdir;

    fn tags() -> ObjectTags {
        ObjectTags {
            content_type: ContentType::Post,
            creator_id: "42".into(),
            mime_type: "video/mp4".into(),
            source_url: Some("https://cdn.example/a.mp4".into()),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            last_transition_at: None,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_metadata() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        storage
            .put("posts/42/a.mp4", Bytes::from_static(b"video"), &tags(), StorageClass::Standard)
            .await
            .unwrap();

        let object = storage.get_metadata("posts/42/a.mp4").await.unwrap();
        assert_eq!(object.size, 5);
        assert_eq!(object.content_type, ContentType::Post);
        assert_eq!(object.storage_class, StorageClass::Standard);
        assert_eq!(object.creator_id, "42");
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_key() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        for body in [&b"first"[..], &b"second!"[..]] {
            storage
                .put("posts/42/a.mp4", Bytes::copy_from_slice(body), &tags(), StorageClass::Standard)
                .await
                .unwrap();
        }

        assert_eq!(storage.get_metadata("posts/42/a.mp4").await.unwrap().size, 7);
        let keys: Vec<String> = storage.list("posts/").try_collect().await.unwrap();
        assert_eq!(keys, vec!["posts/42/a.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_put_file_copies_staged_content() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staged.part");
        tokio::fs::write(&staging, vec![7u8; 1024]).await.unwrap();
        let storage = LocalStorage::new(dir.path().join("store")).await.unwrap();

        let size = storage
            .put_file("posts/42/b.mp4", &staging, &tags(), StorageClass::Standard)
            .await
            .unwrap();
        assert_eq!(size, 1024);
        assert!(staging.exists());
    }

    #[tokio::test]
    async fn test_set_storage_class_stamps_transition() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage
            .put("posts/42/a.mp4", Bytes::from_static(b"x"), &tags(), StorageClass::Standard)
            .await
            .unwrap();

        let at = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        storage
            .set_storage_class("posts/42/a.mp4", StorageClass::Archive, at)
            .await
            .unwrap();

        let object = storage.get_metadata("posts/42/a.mp4").await.unwrap();
        assert_eq!(object.storage_class, StorageClass::Archive);
        assert_eq!(object.last_transition_at, Some(at));

        let missing = storage
            .set_storage_class("posts/42/missing.mp4", StorageClass::Archive, at)
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage
            .put("stories/1/s.mp4", Bytes::from_static(b"x"), &tags(), StorageClass::Standard)
            .await
            .unwrap();

        storage.delete("stories/1/s.mp4").await.unwrap();
        storage.delete("stories/1/s.mp4").await.unwrap();
        assert!(matches!(
            storage.get_metadata("stories/1/s.mp4").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        for key in ["posts/1/a.mp4", "posts/2/b.jpg", "stories/1/c.mp4"] {
            storage
                .put(key, Bytes::from_static(b"x"), &tags(), StorageClass::Standard)
                .await
                .unwrap();
        }

        let mut posts: Vec<String> = storage.list("posts/").try_collect().await.unwrap();
        posts.sort();
        assert_eq!(posts, vec!["posts/1/a.mp4".to_string(), "posts/2/b.jpg".to_string()]);
        let all: Vec<String> = storage.list("").try_collect().await.unwrap();
        assert_eq!(all.len(), 3);
        let narrow: Vec<String> = storage.list("posts/2/b").try_collect().await.unwrap();
        assert_eq!(narrow, vec!["posts/2/b.jpg".to_string()]);
        let none: Vec<String> = storage.list("livestreams/").try_collect().await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_in_progress_writes() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage
            .put("posts/1/a.mp4", Bytes::from_static(b"x"), &tags(), StorageClass::Standard)
            .await
            .unwrap();
        std::fs::write(dir.path().join("objects/posts/1/.b.mp4.1234.tmp"), b"partial").unwrap();

        let mut keys = storage.list("posts/");
        assert_eq!(keys.next().await.unwrap().unwrap(), "posts/1/a.mp4");
        assert!(keys.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_metadata_write_leaves_no_object() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staged.part");
        tokio::fs::write(&staging, vec![7u8; 64]).await.unwrap();
        let storage = LocalStorage::new(dir.path().join("store")).await.unwrap();
        // A directory squatting on the sidecar path makes the metadata write fail
        std::fs::create_dir_all(dir.path().join("store/.meta/posts/42/b.mp4.json/blocker")).unwrap();

        let result = storage
            .put_file("posts/42/b.mp4", &staging, &tags(), StorageClass::Standard)
            .await;

        assert!(result.is_err());
        assert!(!dir.path().join("store/objects/posts/42/b.mp4").exists());
        let leftovers: Vec<String> = storage.list("posts/").try_collect().await.unwrap();
        assert!(leftovers.is_empty());
        let temp_files = std::fs::read_dir(dir.path().join("store/objects/posts/42"))
            .unwrap()
            .count();
        assert_eq!(temp_files, 0);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_bytes_and_tags_together() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage
            .put("posts/42/a.mp4", Bytes::from_static(b"old"), &tags(), StorageClass::Archive)
            .await
            .unwrap();

        let mut newer = tags();
        newer.created_at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        storage
            .put("posts/42/a.mp4", Bytes::from_static(b"newer"), &newer, StorageClass::Standard)
            .await
            .unwrap();

        let object = storage.get_metadata("posts/42/a.mp4").await.unwrap();
        assert_eq!(object.size, 5);
        assert_eq!(object.created_at, newer.created_at);
        assert_eq!(object.storage_class, StorageClass::Standard);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let result = storage.get_metadata("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("posts/../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage
            .put("/etc/passwd", Bytes::new(), &tags(), StorageClass::Standard)
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
