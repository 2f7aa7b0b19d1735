//! In-process typed key/value cache.
//!
//! Holds serialized file metadata and the short-lived advisory locks that
//! serialize upload promotion, copy and move. Entries carry an optional TTL
//! measured from their last write; a background sweeper drops expired
//! entries every 10 seconds. When the map is full, the entry with the
//! oldest last-access time is evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval between expiry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Cache access errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache: key not found")]
    Miss,

    #[error("cache: type mismatch")]
    TypeMismatch,
}

/// Typed cache value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// Cache interface.
///
/// One concrete in-memory backing exists today; the trait keeps the storage
/// layer decoupled from it. A value stored with one type is only
/// retrievable through the matching typed getter.
pub trait Cache: Send + Sync {
    fn get_int(&self, key: &str) -> Result<i64, CacheError>;
    fn get_float(&self, key: &str) -> Result<f64, CacheError>;
    fn get_bool(&self, key: &str) -> Result<bool, CacheError>;
    fn get_string(&self, key: &str) -> Result<String, CacheError>;

    /// Store a value with the default TTL.
    fn set(&self, key: &str, value: CacheValue);

    /// Store a value with an explicit TTL in seconds; `ttl <= 0` never expires.
    fn set_ex(&self, key: &str, value: CacheValue, ttl_secs: i64);

    fn del(&self, key: &str);

    /// Presence check. Does not consult expiry, mirroring the write-side
    /// discipline: expired entries disappear on the next sweep.
    fn exists(&self, key: &str) -> bool;

    fn clear(&self);

    /// Replace the TTL of an existing key; `ttl <= 0` deletes it.
    fn refresh_ttl(&self, key: &str, ttl_secs: i64);
}

struct Entry {
    value: CacheValue,
    /// TTL in seconds; 0 or less means no expiry.
    ttl_secs: i64,
    last_access: Instant,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.ttl_secs > 0 && now > self.last_access + Duration::from_secs(self.ttl_secs as u64)
    }
}

/// Fixed-capacity TTL map guarded by a read/write lock.
pub struct MemoryCache {
    max_entries: usize,
    default_ttl: i64,
    map: RwLock<HashMap<String, Entry>>,
    sweeper: CancellationToken,
}

impl MemoryCache {
    /// Create a cache with the given capacity and default TTL (seconds).
    pub fn new(max_entries: usize, default_ttl: i64) -> Self {
        Self {
            max_entries,
            default_ttl,
            map: RwLock::new(HashMap::new()),
            sweeper: CancellationToken::new(),
        }
    }

    /// Start the background expiry sweeper. Must be called from within a
    /// Tokio runtime; idempotent shutdown via [`MemoryCache::close`].
    pub fn spawn_sweeper(self: Arc<Self>) {
        let cache = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = cache.sweeper.cancelled() => {
                        debug!("cache sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => cache.sweep(),
                }
            }
        });
    }

    /// Stop the background sweeper.
    pub fn close(&self) {
        self.sweeper.cancel();
    }

    /// Remove all expired entries.
    fn sweep(&self) {
        let now = Instant::now();
        let mut map = self.map.write();
        let before = map.len();
        map.retain(|_, entry| !entry.expired(now));
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
    }

    fn get_value(&self, key: &str) -> Result<CacheValue, CacheError> {
        let map = self.map.read();
        let entry = map.get(key).ok_or(CacheError::Miss)?;
        if entry.expired(Instant::now()) {
            return Err(CacheError::Miss);
        }
        Ok(entry.value.clone())
    }

    /// Number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// True when the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Cache for MemoryCache {
    fn get_int(&self, key: &str) -> Result<i64, CacheError> {
        match self.get_value(key)? {
            CacheValue::Int(v) => Ok(v),
            _ => Err(CacheError::TypeMismatch),
        }
    }

    fn get_float(&self, key: &str) -> Result<f64, CacheError> {
        match self.get_value(key)? {
            CacheValue::Float(v) => Ok(v),
            _ => Err(CacheError::TypeMismatch),
        }
    }

    fn get_bool(&self, key: &str) -> Result<bool, CacheError> {
        match self.get_value(key)? {
            CacheValue::Bool(v) => Ok(v),
            _ => Err(CacheError::TypeMismatch),
        }
    }

    fn get_string(&self, key: &str) -> Result<String, CacheError> {
        match self.get_value(key)? {
            CacheValue::Str(v) => Ok(v),
            _ => Err(CacheError::TypeMismatch),
        }
    }

    fn set(&self, key: &str, value: CacheValue) {
        self.set_ex(key, value, self.default_ttl);
    }

    fn set_ex(&self, key: &str, value: CacheValue, ttl_secs: i64) {
        let mut map = self.map.write();

        // At capacity, evict the entry with the oldest last-access time.
        if self.max_entries > 0 && map.len() >= self.max_entries && !map.contains_key(key) {
            let oldest = map
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                map.remove(&oldest);
            }
        }

        map.insert(
            key.to_string(),
            Entry {
                value,
                ttl_secs,
                last_access: Instant::now(),
            },
        );
    }

    fn del(&self, key: &str) {
        self.map.write().remove(key);
    }

    fn exists(&self, key: &str) -> bool {
        self.map.read().contains_key(key)
    }

    fn clear(&self) {
        self.map.write().clear();
    }

    fn refresh_ttl(&self, key: &str, ttl_secs: i64) {
        let mut map = self.map.write();
        if ttl_secs <= 0 {
            map.remove(key);
            return;
        }
        if let Some(entry) = map.get_mut(key) {
            entry.ttl_secs = ttl_secs;
        }
    }
}

/// RAII guard for a short-lived cache lock; deletes the key on drop so the
/// lock is released on every exit path.
pub struct CacheLockGuard {
    cache: Arc<dyn Cache>,
    key: String,
}

impl CacheLockGuard {
    /// Take the lock by writing `true` under `key` with the given TTL.
    pub fn acquire(cache: Arc<dyn Cache>, key: &str, ttl_secs: i64) -> Self {
        cache.set_ex(key, CacheValue::Bool(true), ttl_secs);
        Self {
            cache,
            key: key.to_string(),
        }
    }
}

impl Drop for CacheLockGuard {
    fn drop(&mut self) {
        self.cache.del(&self.key);
    }
}
