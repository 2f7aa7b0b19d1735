//! Application state shared across all handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cache::{Cache, MemoryCache};
use crate::config::Config;
use crate::storage::Storage;
use crate::worker::Pool;

/// Workers in the hashing pool.
const HASH_WORKER_COUNT: usize = 4;

/// Capacity of the hashing job queue.
const HASH_QUEUE_SIZE: usize = 10_000;

/// Retry budget per hash job.
const HASH_MAX_RETRIES: u32 = 3;

/// Base delay between hash job retries; grows linearly per attempt.
const HASH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Application configuration.
    config: Config,

    /// Metadata cache; also the advisory lock table.
    cache: Arc<MemoryCache>,

    /// Content-addressed storage engine.
    storage: Arc<Storage>,

    /// Background hashing pool.
    hash_pool: Arc<Pool<PathBuf>>,

    /// HTTP client for editor callbacks.
    http: reqwest::Client,
}

impl AppState {
    /// Create new application state: resolve the storage directories,
    /// start the cache sweeper and the hashing pool, and wire them into
    /// the storage engine.
    pub async fn new(config: Config) -> Result<Self> {
        let base_path = resolve_dir(&config.file.base_path)
            .context("failed to prepare the base storage path")?;
        let upload_path = resolve_dir(&config.file.upload_path)
            .context("failed to prepare the upload staging path")?;

        let cache = Arc::new(MemoryCache::new(
            config.cache.max_entries,
            config.cache.default_ttl,
        ));
        cache.clone().spawn_sweeper();

        let storage = Arc::new(Storage::new(
            base_path,
            upload_path,
            config.file.allow_folder_creation,
            cache.clone() as Arc<dyn Cache>,
        ));

        let hash_storage = storage.clone();
        let hash_pool = Arc::new(Pool::new(
            "hash",
            HASH_WORKER_COUNT,
            HASH_QUEUE_SIZE,
            HASH_MAX_RETRIES,
            HASH_RETRY_DELAY,
            Arc::new(move |fs_path: PathBuf| {
                let storage = hash_storage.clone();
                Box::pin(async move { storage.update_file_hashes(&fs_path).await })
            }),
        ));
        storage.set_hash_pool(hash_pool.clone());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                cache,
                storage,
                hash_pool,
                http,
            }),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the metadata cache.
    pub fn cache(&self) -> Arc<dyn Cache> {
        self.inner.cache.clone()
    }

    /// Get the storage engine.
    pub fn storage(&self) -> &Arc<Storage> {
        &self.inner.storage
    }

    /// Get the HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Drain background work and stop the cache sweeper.
    pub async fn shutdown(&self) {
        self.inner.hash_pool.stop().await;
        self.inner.cache.close();
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("storage", &self.inner.storage)
            .finish()
    }
}

/// Ensure a directory exists and return its absolute form.
fn resolve_dir(path: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    path.canonicalize()
        .with_context(|| format!("failed to resolve {}", path.display()))
}
