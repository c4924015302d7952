//! Local filesystem backend.

use std::collections::BTreeSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use imgtier_models::{ImageId, QualityLevel};
use scopeguard::ScopeGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::paths::{derive_path, parse_blob_file_name, shard_prefix};
use crate::store::{BlobStore, IdStream};

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    base: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `base`. The directory is created lazily.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Root directory of the store.
    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn locate(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<String> {
        Ok(derive_path(&self.base, id, quality)?.display().to_string())
    }

    async fn save(
        &self,
        id: &ImageId,
        quality: QualityLevel,
        data: &[u8],
    ) -> StorageResult<String> {
        let path = derive_path(&self.base, id, quality)?;
        let len = data.len();

        // One blocking unit: a dropped caller cannot stop it between steps
        let target = path.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&target, &data))
            .await
            .map_err(|e| StorageError::upload_failed(format!("write {}: {}", path.display(), e)))??;

        debug!("Saved {} bytes to {}", len, path.display());
        Ok(path.display().to_string())
    }

    async fn get(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<Vec<u8>> {
        let path = derive_path(&self.base, id, quality)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::not_found(path.display().to_string()),
            _ => StorageError::DownloadFailed(format!("read {}: {}", path.display(), e)),
        })
    }

    async fn delete(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<()> {
        let path = derive_path(&self.base, id, quality)?;
        tokio::fs::remove_file(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::not_found(path.display().to_string()),
            _ => StorageError::delete_failed(format!("remove {}: {}", path.display(), e)),
        })?;

        info!("Deleted {}", path.display());
        Ok(())
    }

    fn list(&self) -> IdStream<'_> {
        let base = self.base.clone();

        stream::once(async move { read_shards(&base).await })
            .map_ok(|shards| stream::iter(shards.into_iter().map(Ok::<_, StorageError>)))
            .try_flatten()
            .and_then(|shard| async move { read_shard_ids(&shard).await })
            .map_ok(|ids| stream::iter(ids.into_iter().map(Ok::<_, StorageError>)))
            .try_flatten()
            .boxed()
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        let metadata = tokio::fs::metadata(&self.base).await?;
        if !metadata.is_dir() {
            return Err(StorageError::config_error(format!(
                "{} is not a directory",
                self.base.display()
            )));
        }
        Ok(())
    }
}

/// Write `data` to a hidden temp file beside `target`, fsync, then rename.
///
/// The temp file is removed on every path that does not end in the rename.
fn write_atomic(target: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = target
        .parent()
        .ok_or_else(|| StorageError::invalid_key(target.display().to_string()))?;

    // Concurrent creation of the same shard is fine here
    std::fs::create_dir_all(dir)
        .map_err(|e| StorageError::upload_failed(format!("create {}: {}", dir.display(), e)))?;

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = scopeguard::guard(
        dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple())),
        |tmp| {
            if let Err(e) = std::fs::remove_file(&tmp) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove temp file {}: {}", tmp.display(), e);
                }
            }
        },
    );

    std::fs::File::create(&*tmp)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&*tmp, target))
        .map_err(|e| StorageError::upload_failed(format!("write {}: {}", target.display(), e)))?;

    // Renamed into place
    ScopeGuard::into_inner(tmp);
    Ok(())
}

/// Shard directories under `base`, sorted. A missing base is an empty store.
async fn read_shards(base: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(base).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StorageError::ListFailed(format!(
                "read {}: {}",
                base.display(),
                e
            )))
        }
    };

    let mut shards = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            shards.push(entry.path());
        }
    }
    shards.sort();
    Ok(shards)
}

/// Distinct ids stored in one shard directory.
///
/// An id always lands in the same shard, so deduplicating per shard
/// yields globally distinct ids.
async fn read_shard_ids(shard: &Path) -> StorageResult<Vec<ImageId>> {
    let shard_name = shard
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut entries = match tokio::fs::read_dir(shard).await {
        Ok(entries) => entries,
        // Removed between listing the base and reading it
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = BTreeSet::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some((id, _quality)) = parse_blob_file_name(&name.to_string_lossy()) else {
            continue;
        };
        if shard_prefix(&id).ok() == Some(shard_name.as_str()) {
            ids.insert(id);
        }
    }
    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().join("storage"));
        (dir, store)
    }

    async fn collect_ids(store: &LocalBlobStore) -> Vec<String> {
        let mut ids: Vec<String> = store
            .list()
            .map_ok(|id| id.to_string())
            .try_collect()
            .await
            .unwrap();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let (_dir, store) = store();
        let id = ImageId::from("ab12cd");

        let locator = store.save(&id, QualityLevel::High, b"jpeg-75").await.unwrap();
        assert!(locator.ends_with("ab/ab12cd_75.jpg"));
        assert_eq!(locator, store.locate(&id, QualityLevel::High).unwrap());

        let data = store.get(&id, QualityLevel::High).await.unwrap();
        assert_eq!(data, b"jpeg-75");
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (_dir, store) = store();
        let id = ImageId::from("ab12cd");

        store.save(&id, QualityLevel::Low, b"first version").await.unwrap();
        store.save(&id, QualityLevel::Low, b"second").await.unwrap();

        assert_eq!(store.get(&id, QualityLevel::Low).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store
            .get(&ImageId::from("zz99"), QualityLevel::Original)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected() {
        let (_dir, store) = store();
        let err = store
            .save(&ImageId::from("../etc"), QualityLevel::Original, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_one_level() {
        let (_dir, store) = store();
        let id = ImageId::from("ab12cd");
        store.save(&id, QualityLevel::Original, b"orig").await.unwrap();
        store.save(&id, QualityLevel::Medium, b"mid").await.unwrap();

        store.delete(&id, QualityLevel::Medium).await.unwrap();

        assert!(store.get(&id, QualityLevel::Medium).await.unwrap_err().is_not_found());
        assert_eq!(store.get(&id, QualityLevel::Original).await.unwrap(), b"orig");
        assert!(store
            .delete(&id, QualityLevel::Medium)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_list_distinct_ids() {
        let (_dir, store) = store();
        for id in ["ab12cd", "ab99ff", "zz01"] {
            let id = ImageId::from(id);
            for level in QualityLevel::ALL {
                store.save(&id, level, b"data").await.unwrap();
            }
        }

        assert_eq!(collect_ids(&store).await, vec!["ab12cd", "ab99ff", "zz01"]);
        // Restartable
        assert_eq!(collect_ids(&store).await.len(), 3);
    }

    #[tokio::test]
    async fn test_list_empty_store() {
        let (_dir, store) = store();
        assert!(collect_ids(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_temp_and_foreign_files() {
        let (_dir, store) = store();
        let id = ImageId::from("ab12cd");
        store.save(&id, QualityLevel::Original, b"orig").await.unwrap();

        let shard = store.base().join("ab");
        tokio::fs::write(shard.join(".ab77_75.jpg.1234.tmp"), b"partial")
            .await
            .unwrap();
        tokio::fs::write(shard.join("notes.txt"), b"hello").await.unwrap();
        // Well-formed name in the wrong shard
        tokio::fs::write(shard.join("cd34_50.jpg"), b"misplaced").await.unwrap();

        assert_eq!(collect_ids(&store).await, vec!["ab12cd"]);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let (_dir, store) = store();
        let id = ImageId::from("ab12cd");
        store.save(&id, QualityLevel::High, b"data").await.unwrap();

        let mut entries = tokio::fs::read_dir(store.base().join("ab")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["ab12cd_75.jpg"]);
    }

    async fn temp_files(shard: &Path) -> Vec<String> {
        let mut entries = match tokio::fs::read_dir(shard).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => panic!("read {}: {}", shard.display(), e),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                names.push(name);
            }
        }
        names
    }

    #[tokio::test]
    async fn test_cancelled_saves_leave_no_temp_files() {
        let (_dir, store) = store();
        let id = ImageId::from("ab12cd");
        let data = vec![0x5a; 4 * 1024 * 1024];

        for i in 0..20u64 {
            let save = store.save(&id, QualityLevel::High, &data);
            let _ = tokio::time::timeout(Duration::from_micros(200 + i * 50), save).await;
        }
        store.save(&id, QualityLevel::High, &data).await.unwrap();

        // Writes already handed off finish in the background
        let shard = store.base().join("ab");
        tokio::time::timeout(Duration::from_secs(30), async {
            while !temp_files(&shard).await.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("temp files removed");

        let stored = store.get(&id, QualityLevel::High).await.unwrap();
        assert_eq!(stored.len(), data.len());
    }

    #[tokio::test]
    async fn test_concurrent_saves_to_distinct_keys() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = ImageId::from(format!("ab{:02}", i));
                for level in QualityLevel::ALL {
                    store.save(&id, level, &[i, level.percent()]).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..16u8 {
            let id = ImageId::from(format!("ab{:02}", i));
            for level in QualityLevel::ALL {
                assert_eq!(
                    store.get(&id, level).await.unwrap(),
                    vec![i, level.percent()]
                );
            }
        }
        assert_eq!(collect_ids(&store).await.len(), 16);
    }

    #[tokio::test]
    async fn test_check_connectivity_creates_base() {
        let (_dir, store) = store();
        store.check_connectivity().await.unwrap();
        assert!(store.base().is_dir());
    }
}
