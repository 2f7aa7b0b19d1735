//! Server-side file operations: copy, move, create-empty.
//!
//! All three act on whole logical file directories and rewrite the
//! path-derived metadata fields of the target. Callers wrap each operation
//! in the per-file cache lock.

use tokio::fs;

use super::{FILE_APPEND, ParsedPath, Storage, StorageError};
use crate::storage::FileMeta;

impl Storage {
    /// Copy a logical file: stream every non-directory entry of the source
    /// directory into the target, then rewrite the target metadata.
    pub async fn copy_file(
        &self,
        source: &ParsedPath,
        target: &ParsedPath,
    ) -> Result<(), StorageError> {
        fs::create_dir_all(&target.fs).await?;

        let mut entries = fs::read_dir(&source.fs).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            fs::copy(entry.path(), target.fs.join(entry.file_name())).await?;
        }

        // The copied sidecar carries the source's mime and hashes; only the
        // path-derived fields and the upload time change.
        self.update_file_meta(
            &target.fs,
            FileMeta {
                relative_path: target.relative.clone(),
                file_name: base_name(&target.relative),
                uploaded_at: chrono::Utc::now().timestamp(),
                ..FileMeta::default()
            },
        )
        .await?;

        Ok(())
    }

    /// Move a logical file by renaming its directory, then patch the
    /// path-derived metadata fields.
    pub async fn move_file(
        &self,
        source: &ParsedPath,
        target: &ParsedPath,
    ) -> Result<(), StorageError> {
        if let Some(parent) = target.fs.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::metadata(&target.fs).await.is_ok() {
            fs::remove_dir_all(&target.fs).await?;
        }

        fs::rename(&source.fs, &target.fs).await?;

        // Neither side's cached metadata matches the disk any more.
        for fs_path in [&source.fs, &target.fs] {
            let key = format!(
                "{}{}",
                super::FILE_META_CACHE_PREFIX,
                fs_path.join(super::META_APPEND).display()
            );
            self.cache.del(&key);
        }

        self.update_file_meta(
            &target.fs,
            FileMeta {
                relative_path: target.relative.clone(),
                file_name: base_name(&target.relative),
                ..FileMeta::default()
            },
        )
        .await?;

        Ok(())
    }

    /// Create an empty logical file with initial metadata.
    pub async fn create_file(&self, parsed: &ParsedPath) -> Result<(), StorageError> {
        fs::create_dir_all(&parsed.fs).await?;
        fs::File::create(parsed.fs.join(FILE_APPEND)).await?;

        self.update_file_meta(
            &parsed.fs,
            FileMeta {
                relative_path: parsed.relative.clone(),
                file_name: base_name(&parsed.relative),
                uploaded_at: chrono::Utc::now().timestamp(),
                ..FileMeta::default()
            },
        )
        .await?;

        Ok(())
    }
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
    use std::path::Path;
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

    async fn seed(storage: &Storage, raw: &str, content: &[u8]) -> ParsedPath {
        let parsed = storage.parse_path(raw).unwrap();
        storage.write_staging(&parsed.relative, content).await.unwrap();
        storage.complete_upload(&parsed).await.unwrap();
        parsed
    }

    #[tokio::test]
    async fn copy_duplicates_content_and_rewrites_meta() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());

        let source = seed(&storage, "/a.txt", b"copy me").await;
        let target = storage.parse_path("/b.txt").unwrap();

        storage.copy_file(&source, &target).await.unwrap();

        let copied = fs::read(target.fs.join(FILE_APPEND)).await.unwrap();
        assert_eq!(copied, b"copy me");
        // Source is untouched.
        assert!(storage.file_exists(&source.fs).await);

        let meta = storage.get_file_meta(&target.fs).await;
        assert_eq!(meta.relative_path, "b.txt");
        assert_eq!(meta.file_name, "b.txt");
        // The sniffed mime carries over from the source sidecar.
        assert_eq!(meta.mime_type, "text/plain");
    }

    #[tokio::test]
    async fn move_renames_directory_and_rewrites_meta() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());

        let source = seed(&storage, "/from/x.txt", b"move me").await;
        let target = storage.parse_path("/to/y.txt").unwrap();

        storage.move_file(&source, &target).await.unwrap();

        assert!(!storage.file_exists(&source.fs).await);
        let moved = fs::read(target.fs.join(FILE_APPEND)).await.unwrap();
        assert_eq!(moved, b"move me");

        let meta = storage.get_file_meta(&target.fs).await;
        assert_eq!(meta.relative_path, "to/y.txt");
        assert_eq!(meta.file_name, "y.txt");
    }

    #[tokio::test]
    async fn move_replaces_an_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());

        let source = seed(&storage, "/src.txt", b"new").await;
        let target = seed(&storage, "/dst.txt", b"old").await;

        storage.move_file(&source, &target).await.unwrap();

        let content = fs::read(target.fs.join(FILE_APPEND)).await.unwrap();
        assert_eq!(content, b"new");
    }

    #[tokio::test]
    async fn create_makes_an_empty_file_with_meta() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());
        let parsed = storage.parse_path("/fresh/empty.bin").unwrap();

        storage.create_file(&parsed).await.unwrap();

        let info = storage.get_file_info(&parsed.fs).await.unwrap();
        assert_eq!(info.file_size, 0);
        assert_eq!(info.file_meta.file_name, "empty.bin");
        assert_eq!(info.file_meta.relative_path, "fresh/empty.bin");
        assert!(info.file_meta.uploaded_at > 0);
    }
}
