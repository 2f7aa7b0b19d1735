//! Resumable upload staging and promotion.
//!
//! Each in-progress upload owns one staging file named by the SHA3-256 of
//! its relative path. Promotion sniffs the MIME type, renames the staging
//! file over the payload entry, refreshes the metadata, queues background
//! hashing and drops any cached image derivatives. A cache lock keyed on
//! the target directory keeps concurrent promotions of the same logical
//! file from interleaving.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::meta::retry_rename;
use super::{
    FILE_APPEND, ParsedPath, Storage, StorageError, UPLOADING_CACHE_PREFIX, UPLOADING_LOCK_TTL,
};
use crate::cache::CacheLockGuard;
use crate::storage::FileMeta;

/// Bytes peeked from the staging file head for MIME sniffing.
const SNIFF_HEAD_SIZE: usize = 8192;

impl Storage {
    /// The staging file path for a relative path.
    pub fn staging_path(&self, relative: &str) -> PathBuf {
        self.upload_path.join(crate::hash::string_sha3_256(relative))
    }

    /// Open (or create) the staging file for ranged writes.
    ///
    /// Fails with [`StorageError::DirCreation`] when the relative path
    /// requires a subdirectory and folder creation is disabled.
    pub async fn open_staging(&self, relative: &str) -> Result<fs::File, StorageError> {
        self.check_folder_creation(relative)?;

        let tmp_path = self.staging_path(relative);
        fs::create_dir_all(&self.upload_path).await?;

        let file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&tmp_path)
            .await?;
        Ok(file)
    }

    /// Replace the staging file contents in one shot (multipart upload).
    pub async fn write_staging(&self, relative: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check_folder_creation(relative)?;

        fs::create_dir_all(&self.upload_path).await?;
        let tmp_path = self.staging_path(relative);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Remove the staging file, cancelling the upload session.
    pub async fn remove_staging(&self, relative: &str) -> Result<(), StorageError> {
        let tmp_path = self.staging_path(relative);
        fs::remove_file(&tmp_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound,
            _ => StorageError::Io(e),
        })
    }

    /// Promote a completed upload into its logical file directory.
    ///
    /// Holds the per-file cache lock for the duration; a concurrent
    /// promotion of the same fingerprint fails with
    /// [`StorageError::Uploading`].
    pub async fn complete_upload(&self, parsed: &ParsedPath) -> Result<(), StorageError> {
        let fs_path = &parsed.fs;
        let lock_key = format!("{UPLOADING_CACHE_PREFIX}{}", fs_path.display());

        if self.cache.exists(&lock_key) {
            return Err(StorageError::Uploading);
        }

        let tmp_path = self.staging_path(&parsed.relative);
        if fs::metadata(&tmp_path).await.is_err() {
            return Err(StorageError::NotFound);
        }

        // Released on every exit path; the TTL bounds a crashed promotion.
        let _lock = CacheLockGuard::acquire(self.cache.clone(), &lock_key, UPLOADING_LOCK_TTL);

        let mime_type = sniff_mime_type(&tmp_path).await?;

        fs::create_dir_all(fs_path).await?;
        retry_rename(&tmp_path, &fs_path.join(FILE_APPEND)).await?;

        self.update_file_meta(
            fs_path,
            FileMeta {
                relative_path: parsed.relative.clone(),
                file_name: base_name(&parsed.relative),
                mime_type,
                uploaded_at: chrono::Utc::now().timestamp(),
                ..FileMeta::default()
            },
        )
        .await?;

        if let Some(pool) = self.hash_pool() {
            pool.add_job(fs_path.clone());
        }

        self.invalidate_derivatives(fs_path);

        Ok(())
    }

    /// Compute the payload digests and merge them into the metadata.
    /// Runs on the hashing pool, never on a request path.
    pub async fn update_file_hashes(&self, fs_path: &Path) -> anyhow::Result<()> {
        let file_path = fs_path.join(FILE_APPEND);
        let hash = tokio::task::spawn_blocking(move || -> anyhow::Result<super::FileHash> {
            Ok(super::FileHash {
                sha1: crate::hash::file_sha1(&file_path)?,
                sha256: crate::hash::file_sha256(&file_path)?,
                md5: crate::hash::file_md5(&file_path)?,
            })
        })
        .await??;

        self.update_file_meta(
            fs_path,
            FileMeta {
                hash,
                ..FileMeta::default()
            },
        )
        .await?;
        Ok(())
    }

    /// Drop every cached derivative next to the payload, off the request
    /// path. Failures are logged; the caches regenerate on demand.
    fn invalidate_derivatives(&self, fs_path: &Path) {
        let fs_path = fs_path.to_path_buf();
        tokio::spawn(async move {
            if let Err(e) = super::image::remove_derivatives(&fs_path).await {
                warn!(error = %e, path = %fs_path.display(), "failed to remove image derivatives");
            }
        });
    }

    fn check_folder_creation(&self, relative: &str) -> Result<(), StorageError> {
        if relative.contains('/') && !self.allow_folder_creation {
            return Err(StorageError::DirCreation);
        }
        Ok(())
    }
}

/// Sniff the MIME type from the head bytes of a file.
///
/// Magic-byte detection first; heads that decode as UTF-8 fall back to
/// `text/plain`, everything else to `application/octet-stream`. All
/// `text/*` types collapse to `text/plain`.
async fn sniff_mime_type(path: &Path) -> Result<String, StorageError> {
    use tokio::io::AsyncReadExt;

    let mut file = fs::File::open(path).await?;
    let mut head = vec![0u8; SNIFF_HEAD_SIZE];
    let mut filled = 0usize;
    loop {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == head.len() {
            break;
        }
    }
    head.truncate(filled);

    let mime = match infer::get(&head) {
        Some(kind) => kind.mime_type().to_string(),
        None if std::str::from_utf8(&head).is_ok() => "text/plain".to_string(),
        None => "application/octet-stream".to_string(),
    };

    let mime = if mime.starts_with("text/") {
        "text/plain".to_string()
    } else {
        mime
    };

    debug!(path = %path.display(), mime = %mime, "sniffed staging file");
    Ok(mime)
}

/// Basename of a `/`-separated relative path.
fn base_name(relative: &str) -> String {
    relative
        .rsplit('/')
        .next()
        .unwrap_or(relative)
        .to_string()
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{Cache, CacheValue, MemoryCache};
    use crate::storage::META_APPEND;

    fn test_storage(dir: &Path, allow_folders: bool) -> Storage {
        Storage::new(
            dir.join("data"),
            dir.join("upload"),
            allow_folders,
            Arc::new(MemoryCache::new(100, 60)),
        )
    }

    #[tokio::test]
    async fn staging_path_is_keyed_by_relative_hash() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path(), true);
        let expected = dir
            .path()
            .join("upload")
            .join(crate::hash::string_sha3_256("a/b.txt"));
        assert_eq!(storage.staging_path("a/b.txt"), expected);
    }

    #[tokio::test]
    async fn subdirectory_requires_folder_creation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path(), false);

        assert!(matches!(
            storage.open_staging("a/b.txt").await,
            Err(StorageError::DirCreation)
        ));
        // Top-level names are still allowed.
        assert!(storage.open_staging("b.txt").await.is_ok());
    }

    #[tokio::test]
    async fn complete_upload_promotes_and_writes_meta() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path(), true);
        let parsed = storage.parse_path("/docs/report.txt").unwrap();

        storage
            .write_staging(&parsed.relative, b"hello goflet")
            .await
            .unwrap();
        storage.complete_upload(&parsed).await.unwrap();

        // Staging file is gone, payload is in place.
        assert!(fs::metadata(storage.staging_path(&parsed.relative))
            .await
            .is_err());
        let payload = fs::read(parsed.fs.join(FILE_APPEND)).await.unwrap();
        assert_eq!(payload, b"hello goflet");

        let meta = storage.get_file_meta(&parsed.fs).await;
        assert_eq!(meta.relative_path, "docs/report.txt");
        assert_eq!(meta.file_name, "report.txt");
        assert_eq!(meta.mime_type, "text/plain");
        assert!(meta.uploaded_at > 0);
    }

    #[tokio::test]
    async fn complete_upload_without_staging_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path(), true);
        let parsed = storage.parse_path("/nothing.bin").unwrap();

        assert!(matches!(
            storage.complete_upload(&parsed).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_promotion_is_rejected_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path(), true);
        let parsed = storage.parse_path("/locked.bin").unwrap();
        storage.write_staging(&parsed.relative, b"x").await.unwrap();

        let lock_key = format!("{UPLOADING_CACHE_PREFIX}{}", parsed.fs.display());
        storage.cache().set_ex(&lock_key, CacheValue::Bool(true), 60);

        assert!(matches!(
            storage.complete_upload(&parsed).await,
            Err(StorageError::Uploading)
        ));

        // Lock released: promotion proceeds and releases it again.
        storage.cache().del(&lock_key);
        storage.complete_upload(&parsed).await.unwrap();
        assert!(!storage.cache().exists(&lock_key));
    }

    #[tokio::test]
    async fn promotion_invalidates_cached_derivatives() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path(), true);
        let parsed = storage.parse_path("/pic.png").unwrap();

        fs::create_dir_all(&parsed.fs).await.unwrap();
        fs::write(parsed.fs.join(".image_w64h64s0q90a0fpng"), b"old")
            .await
            .unwrap();
        fs::write(parsed.fs.join(META_APPEND), b"{}").await.unwrap();

        storage.write_staging(&parsed.relative, b"new payload").await.unwrap();
        storage.complete_upload(&parsed).await.unwrap();

        // Invalidation is fire-and-forget; give it a moment.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut entries = fs::read_dir(&parsed.fs).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            assert!(
                !name.starts_with(".image_"),
                "stale derivative survived promotion: {name}"
            );
        }
    }

    #[tokio::test]
    async fn cancel_removes_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path(), true);

        storage.write_staging("x", b"partial").await.unwrap();
        storage.remove_staging("x").await.unwrap();

        assert!(matches!(
            storage.remove_staging("x").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_file_hashes_fills_meta() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path(), true);
        let parsed = storage.parse_path("/hashed.txt").unwrap();

        storage.write_staging(&parsed.relative, b"abc").await.unwrap();
        storage.complete_upload(&parsed).await.unwrap();
        storage.update_file_hashes(&parsed.fs).await.unwrap();

        let meta = storage.get_file_meta(&parsed.fs).await;
        assert_eq!(meta.hash.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(meta.hash.md5, "900150983cd24fb0d6963f7d28e17f72");
        // The earlier promotion fields survive the hash-only merge.
        assert_eq!(meta.file_name, "hashed.txt");
    }
}
