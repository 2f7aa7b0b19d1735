//! Image derivatives.
//!
//! A derivative is a parameterized re-encoding of an image payload, cached
//! on disk next to the source as `.image_<paramDigest>`. Derivatives are
//! regenerated on demand and dropped whenever the payload changes.

mod params;
mod process;

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

pub use params::{PictureFormat, ProcessParams, ScaleMode};
pub use process::{ProcessError, process_image};

use super::{IMAGE_APPEND, Storage, StorageError};

/// An opened cached derivative.
pub struct CachedDerivative {
    pub file: fs::File,
    pub size: i64,
    /// Derivative mtime, unix seconds.
    pub last_modified: i64,
}

impl Storage {
    /// On-disk path of the derivative for the given parameters.
    pub fn derivative_path(&self, fs_path: &Path, params: &ProcessParams) -> PathBuf {
        fs_path.join(format!("{IMAGE_APPEND}{}", params.digest()))
    }

    /// Open a cached derivative. Empty or missing files count as a miss.
    pub async fn open_derivative(
        &self,
        fs_path: &Path,
        params: &ProcessParams,
    ) -> Result<Option<CachedDerivative>, StorageError> {
        let path = self.derivative_path(fs_path, params);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let stat = file.metadata().await?;
        if stat.len() == 0 {
            return Ok(None);
        }

        let last_modified = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(Some(CachedDerivative {
            file,
            size: stat.len() as i64,
            last_modified,
        }))
    }

    /// Persist an encoded derivative next to its source.
    pub async fn save_derivative(
        &self,
        fs_path: &Path,
        params: &ProcessParams,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.derivative_path(fs_path, params);
        fs::write(&path, data).await?;
        debug!(path = %path.display(), size = data.len(), "saved image derivative");
        Ok(())
    }
}

/// Remove every `.image_*` entry in a logical file directory.
pub async fn remove_derivatives(fs_path: &Path) -> std::io::Result<()> {
    let mut entries = match fs::read_dir(fs_path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(IMAGE_APPEND) {
            let _ = fs::remove_file(entry.path()).await;
        }
    }
    Ok(())
}
