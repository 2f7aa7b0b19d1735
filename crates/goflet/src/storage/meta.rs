//! Sidecar file metadata.
//!
//! Each logical file directory carries a `.meta` entry: a JSON record that
//! is read through the cache and rewritten atomically (fresh temp file,
//! then rename) so readers never observe a partial record. A sidecar that
//! fails to decode degrades to empty metadata.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::{
    FILE_APPEND, FILE_META_CACHE_PREFIX, META_APPEND, Storage, StorageError,
};
use crate::cache::CacheValue;

/// Maximum rename attempts when replacing `.meta` or promoting a payload.
const RENAME_MAX_ATTEMPTS: u32 = 100;

/// Base sleep between rename attempts; grows linearly per attempt, so a
/// full retry run is bounded by roughly five seconds.
const RENAME_RETRY_STEP: Duration = Duration::from_millis(1);

/// Content digests of a payload; empty until background hashing finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    #[serde(default)]
    pub sha1: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub md5: String,
}

/// The sidecar metadata record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileMeta {
    /// Base-relative path of the logical file.
    pub relative_path: String,
    /// Basename of the relative path.
    pub file_name: String,
    /// Sniffed MIME type.
    pub mime_type: String,
    /// Upload completion time, unix seconds.
    pub uploaded_at: i64,
    /// Content digests.
    pub hash: FileHash,
}

/// Derived file information; never stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Path of the payload; rewritten to the relative path when served.
    pub file_path: String,
    pub file_size: i64,
    /// Payload mtime, unix seconds.
    pub last_modified: i64,
    pub file_meta: FileMeta,
}

impl FileInfo {
    /// Whether the payload is an image, judged by its stored MIME type.
    pub fn is_image(&self) -> bool {
        self.file_meta.mime_type.starts_with("image/")
    }
}

impl Storage {
    /// Read the metadata sidecar for a logical file directory.
    ///
    /// Read-through cached; decode errors degrade to empty metadata and the
    /// cache is repopulated asynchronously in both cases.
    pub async fn get_file_meta(&self, fs_path: &Path) -> FileMeta {
        let meta_path = fs_path.join(META_APPEND);
        let cache_key = format!("{FILE_META_CACHE_PREFIX}{}", meta_path.display());

        if let Ok(cached) = self.cache.get_string(&cache_key) {
            match serde_json::from_str(&cached) {
                Ok(meta) => return meta,
                Err(e) => warn!(error = %e, "failed to decode cached file metadata"),
            }
        }

        let meta = match fs::read(&meta_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, path = %meta_path.display(), "failed to decode meta sidecar");
                FileMeta::default()
            }),
            Err(_) => FileMeta::default(),
        };

        self.cache_file_meta(&cache_key, &meta);
        meta
    }

    /// Merge `patch` over the current metadata and atomically replace the
    /// sidecar. Empty patch fields keep their prior values, so a non-empty
    /// hash is never overwritten by an empty one.
    pub async fn update_file_meta(
        &self,
        fs_path: &Path,
        mut patch: FileMeta,
    ) -> Result<(), StorageError> {
        let old = self.get_file_meta(fs_path).await;

        if patch.relative_path.is_empty() {
            patch.relative_path = old.relative_path;
        }
        if patch.file_name.is_empty() {
            patch.file_name = old.file_name;
        }
        if patch.mime_type.is_empty() {
            patch.mime_type = old.mime_type;
        }
        if patch.uploaded_at == 0 {
            patch.uploaded_at = old.uploaded_at;
        }
        if patch.hash.sha1.is_empty() {
            patch.hash.sha1 = old.hash.sha1;
        }
        if patch.hash.sha256.is_empty() {
            patch.hash.sha256 = old.hash.sha256;
        }
        if patch.hash.md5.is_empty() {
            patch.hash.md5 = old.hash.md5;
        }

        let encoded =
            serde_json::to_vec(&patch).context("failed to encode file metadata")?;

        let tmp_path = fs_path.join(format!("tmp-meta-{}", random_suffix()));
        fs::write(&tmp_path, &encoded).await?;

        let meta_path = fs_path.join(META_APPEND);
        if let Err(e) = retry_rename(&tmp_path, &meta_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        let cache_key = format!("{FILE_META_CACHE_PREFIX}{}", meta_path.display());
        self.cache_file_meta(&cache_key, &patch);

        Ok(())
    }

    /// Delete a logical file: remove its whole directory.
    pub async fn delete_file(&self, fs_path: &Path) -> Result<(), StorageError> {
        if fs::metadata(fs_path).await.is_err() {
            return Err(StorageError::NotFound);
        }
        fs::remove_dir_all(fs_path).await?;

        let meta_path = fs_path.join(META_APPEND);
        self.cache
            .del(&format!("{FILE_META_CACHE_PREFIX}{}", meta_path.display()));
        Ok(())
    }

    /// Whether a logical file exists, judged by its payload entry.
    pub async fn file_exists(&self, fs_path: &Path) -> bool {
        fs::metadata(fs_path.join(FILE_APPEND)).await.is_ok()
    }

    /// Stat the payload and combine it with the sidecar metadata.
    pub async fn get_file_info(&self, fs_path: &Path) -> Result<FileInfo, StorageError> {
        let file_path = fs_path.join(FILE_APPEND);
        let stat = fs::metadata(&file_path)
            .await
            .map_err(|_| StorageError::NotFound)?;

        let last_modified = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let file_meta = self.get_file_meta(fs_path).await;

        Ok(FileInfo {
            file_path: file_path.display().to_string(),
            file_size: stat.len() as i64,
            last_modified,
            file_meta,
        })
    }

    /// Open the payload for reading.
    pub async fn file_reader(&self, fs_path: &Path) -> Result<fs::File, StorageError> {
        fs::File::open(fs_path.join(FILE_APPEND))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StorageError::NotFound,
                _ => StorageError::Io(e),
            })
    }

    /// Repopulate the metadata cache off the request path.
    fn cache_file_meta(&self, cache_key: &str, meta: &FileMeta) {
        match serde_json::to_string(meta) {
            Ok(json) => {
                let cache = self.cache.clone();
                let key = cache_key.to_string();
                tokio::spawn(async move {
                    cache.set(&key, CacheValue::Str(json));
                });
            }
            Err(e) => warn!(error = %e, "failed to encode file metadata for cache"),
        }
    }
}

/// Rename with bounded retry to tolerate transient sharing violations on
/// filesystems where rename-over is not atomic.
pub(super) async fn retry_rename(from: &Path, to: &Path) -> std::io::Result<()> {
    let mut last_err = None;
    for attempt in 1..=RENAME_MAX_ATTEMPTS {
        match fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
        if attempt < RENAME_MAX_ATTEMPTS {
            debug!(
                from = %from.display(),
                to = %to.display(),
                attempt,
                "rename failed, retrying"
            );
            tokio::time::sleep(RENAME_RETRY_STEP * attempt).await;
        }
    }
    // Retries exhausted; attempts guarantee at least one error was seen.
    Err(last_err.unwrap_or_else(|| std::io::Error::other("rename failed")))
}

/// Ten random alphanumeric characters for transient sidecar names.
fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::MemoryCache;

    fn test_storage(dir: &Path) -> Storage {
        Storage::new(
            dir.join("data"),
            dir.join("upload"),
            true,
            Arc::new(MemoryCache::new(100, 60)),
        )
    }

    async fn prepared(dir: &Path) -> (Storage, std::path::PathBuf) {
        let storage = test_storage(dir);
        let fs_path = storage.relative_to_fs("a/b.txt");
        fs::create_dir_all(&fs_path).await.unwrap();
        fs::write(fs_path.join(FILE_APPEND), b"payload").await.unwrap();
        (storage, fs_path)
    }

    #[tokio::test]
    async fn missing_sidecar_reads_as_empty_meta() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, fs_path) = prepared(dir.path()).await;

        assert_eq!(storage.get_file_meta(&fs_path).await, FileMeta::default());
    }

    #[tokio::test]
    async fn corrupt_sidecar_reads_as_empty_meta() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, fs_path) = prepared(dir.path()).await;
        fs::write(fs_path.join(META_APPEND), b"{not json")
            .await
            .unwrap();

        assert_eq!(storage.get_file_meta(&fs_path).await, FileMeta::default());
    }

    #[tokio::test]
    async fn update_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, fs_path) = prepared(dir.path()).await;

        storage
            .update_file_meta(
                &fs_path,
                FileMeta {
                    relative_path: "a/b.txt".into(),
                    file_name: "b.txt".into(),
                    mime_type: "text/plain".into(),
                    uploaded_at: 1700000000,
                    hash: FileHash::default(),
                },
            )
            .await
            .unwrap();

        let meta = storage.get_file_meta(&fs_path).await;
        assert_eq!(meta.relative_path, "a/b.txt");
        assert_eq!(meta.mime_type, "text/plain");
        assert_eq!(meta.uploaded_at, 1700000000);
    }

    #[tokio::test]
    async fn partial_update_preserves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, fs_path) = prepared(dir.path()).await;

        storage
            .update_file_meta(
                &fs_path,
                FileMeta {
                    relative_path: "a/b.txt".into(),
                    file_name: "b.txt".into(),
                    mime_type: "text/plain".into(),
                    uploaded_at: 100,
                    hash: FileHash {
                        sha1: "aa".into(),
                        sha256: "bb".into(),
                        md5: "cc".into(),
                    },
                },
            )
            .await
            .unwrap();

        // A patch touching only the mime type keeps everything else,
        // including the non-empty hashes.
        storage
            .update_file_meta(
                &fs_path,
                FileMeta {
                    mime_type: "application/json".into(),
                    ..FileMeta::default()
                },
            )
            .await
            .unwrap();

        let meta = storage.get_file_meta(&fs_path).await;
        assert_eq!(meta.mime_type, "application/json");
        assert_eq!(meta.relative_path, "a/b.txt");
        assert_eq!(meta.uploaded_at, 100);
        assert_eq!(meta.hash.sha1, "aa");
        assert_eq!(meta.hash.md5, "cc");
    }

    #[tokio::test]
    async fn update_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, fs_path) = prepared(dir.path()).await;

        storage
            .update_file_meta(
                &fs_path,
                FileMeta {
                    mime_type: "text/plain".into(),
                    ..FileMeta::default()
                },
            )
            .await
            .unwrap();

        let mut entries = fs::read_dir(&fs_path).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            assert!(
                !name.starts_with("tmp-meta-"),
                "leftover temp sidecar: {name}"
            );
        }
    }

    #[tokio::test]
    async fn delete_file_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, fs_path) = prepared(dir.path()).await;

        assert!(storage.file_exists(&fs_path).await);
        storage.delete_file(&fs_path).await.unwrap();
        assert!(!storage.file_exists(&fs_path).await);
        assert!(fs::metadata(&fs_path).await.is_err());

        assert!(matches!(
            storage.delete_file(&fs_path).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn file_info_reports_size_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, fs_path) = prepared(dir.path()).await;
        storage
            .update_file_meta(
                &fs_path,
                FileMeta {
                    file_name: "b.txt".into(),
                    mime_type: "image/png".into(),
                    ..FileMeta::default()
                },
            )
            .await
            .unwrap();

        let info = storage.get_file_info(&fs_path).await.unwrap();
        assert_eq!(info.file_size, 7);
        assert!(info.last_modified > 0);
        assert!(info.is_image());

        let missing = storage.relative_to_fs("missing");
        assert!(matches!(
            storage.get_file_info(&missing).await,
            Err(StorageError::NotFound)
        ));
    }
}
