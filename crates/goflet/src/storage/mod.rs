//! Content-addressed storage engine.
//!
//! Every logical file lives in its own directory under the base path,
//! keyed by the SHA3-256 fingerprint of its relative path:
//!
//! ```text
//! basePath/<F[0:2]>/<F[2:4]>/<F>/
//!     .file                 payload
//!     .meta                 serialized metadata
//!     .image_<paramDigest>  cached image derivatives
//! ```
//!
//! In-progress uploads stage under `uploadPath/<SHA3-256(relative)>` and are
//! promoted into place with an atomic rename.

pub mod image;
mod meta;
mod ops;
mod path;
mod upload;

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::cache::Cache;
use crate::worker::Pool;

pub use meta::{FileHash, FileInfo, FileMeta};
pub use path::{ParsedPath, PathError};

/// Payload entry name inside a logical file directory.
pub const FILE_APPEND: &str = ".file";

/// Metadata entry name inside a logical file directory.
pub const META_APPEND: &str = ".meta";

/// Prefix of cached image derivatives inside a logical file directory.
pub const IMAGE_APPEND: &str = ".image_";

/// Cache key prefix for serialized file metadata.
pub const FILE_META_CACHE_PREFIX: &str = "file_meta_";

/// Cache key prefix for the per-file promotion lock.
pub const UPLOADING_CACHE_PREFIX: &str = "uploading:";

/// TTL of the promotion lock in seconds.
pub const UPLOADING_LOCK_TTL: i64 = 60;

/// Storage layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found")]
    NotFound,

    #[error("directory creation not allowed")]
    DirCreation,

    #[error("file completion in progress")]
    Uploading,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Storage engine façade.
///
/// Owns the resolved base and upload directories, the metadata cache used
/// for read-through metadata and advisory locks, and (once wired) the
/// background hashing pool.
pub struct Storage {
    base_path: PathBuf,
    upload_path: PathBuf,
    allow_folder_creation: bool,
    cache: Arc<dyn Cache>,
    hash_pool: OnceLock<Arc<Pool<PathBuf>>>,
}

impl Storage {
    /// Create a storage engine over resolved (absolute, existing) paths.
    pub fn new(
        base_path: PathBuf,
        upload_path: PathBuf,
        allow_folder_creation: bool,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            base_path,
            upload_path,
            allow_folder_creation,
            cache,
            hash_pool: OnceLock::new(),
        }
    }

    /// Wire the background hashing pool. Called once at startup; promotion
    /// enqueues a hash job for every completed upload.
    pub fn set_hash_pool(&self, pool: Arc<Pool<PathBuf>>) {
        let _ = self.hash_pool.set(pool);
    }

    /// The resolved base storage directory.
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// The resolved upload staging directory.
    pub fn upload_path(&self) -> &PathBuf {
        &self.upload_path
    }

    /// The metadata cache.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    fn hash_pool(&self) -> Option<&Arc<Pool<PathBuf>>> {
        self.hash_pool.get()
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("base_path", &self.base_path)
            .field("upload_path", &self.upload_path)
            .field("allow_folder_creation", &self.allow_folder_creation)
            .finish()
    }
}
