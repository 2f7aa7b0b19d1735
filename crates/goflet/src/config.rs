//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind (default: 0.0.0.0).
    pub host: String,

    /// HTTP server port (default: 8080).
    pub port: u16,

    /// File storage settings.
    pub file: FileConfig,

    /// Metadata cache settings.
    pub cache: CacheConfig,

    /// Image derivative settings.
    pub image: ImageConfig,

    /// Janitor intervals.
    pub cron: CronConfig,

    /// Client-side caching headers.
    pub client_cache: ClientCacheConfig,

    /// JWT authentication settings.
    pub jwt: JwtConfig,
}

/// File storage settings.
#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Base path where logical files are stored (default: ./data).
    pub base_path: PathBuf,

    /// Staging path for in-progress uploads (default: ./upload).
    pub upload_path: PathBuf,

    /// Allow virtual paths with subdirectories (default: true).
    pub allow_folder_creation: bool,

    /// Maximum total upload size in bytes (default: 1 GiB).
    pub upload_limit: i64,

    /// Seconds of inactivity before a staging file is reclaimed
    /// (default: 7200).
    pub upload_timeout: u64,

    /// Maximum request body size in bytes (default: 20 MiB).
    pub max_post_size: i64,
}

/// Metadata cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cache entries (default: 100).
    pub max_entries: usize,

    /// Default TTL in seconds for cache writes (default: 60).
    pub default_ttl: i64,
}

/// Image derivative settings.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Output format when the query does not pick one (default: jpeg).
    pub default_format: String,

    /// Formats the query may request (default: jpeg,png,gif).
    pub allowed_formats: Vec<String>,

    /// When set, width/height are only honored if listed in
    /// `allowed_sizes` (default: false).
    pub strict_mode: bool,

    /// Permitted target sizes under strict mode.
    pub allowed_sizes: Vec<u32>,

    /// Maximum source image width (default: 4096).
    pub max_width: u32,

    /// Maximum source image height (default: 4096).
    pub max_height: u32,

    /// Maximum source file size eligible for processing (default: 20 MiB).
    pub max_file_size: i64,
}

/// Janitor intervals in seconds; zero or negative disables a task.
#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Interval for pruning empty fingerprint directories (default: 3600).
    pub delete_empty_folder: i64,

    /// Interval for expiring stale staging files (default: 3600).
    pub clean_outdated_file: i64,
}

/// Client-side caching headers.
#[derive(Debug, Clone)]
pub struct ClientCacheConfig {
    /// Emit `Cache-Control: max-age=...` on downloads (default: false).
    pub enabled: bool,

    /// The max-age value in seconds (default: 3600).
    pub max_age: u64,
}

/// JWT authentication settings.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Require a valid token on every request (default: true).
    pub enabled: bool,

    /// Signing algorithm, one of HS256/HS384/HS512 (default: HS256).
    pub algorithm: String,

    /// Shared signing key.
    pub signing_key: String,

    /// Accept tokens from any issuer (default: true when no issuer list
    /// is configured).
    pub trust_any_issuer: bool,

    /// Issuers accepted when `trust_any_issuer` is false.
    pub trusted_issuers: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let host = env::var("GOFLET_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_env("GOFLET_PORT", 8080u16)?;

        let file = FileConfig {
            base_path: env::var("GOFLET_BASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            upload_path: env::var("GOFLET_UPLOAD_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./upload")),
            allow_folder_creation: parse_env("GOFLET_ALLOW_FOLDER_CREATION", true)?,
            upload_limit: parse_env("GOFLET_UPLOAD_LIMIT", 1_073_741_824i64)?,
            upload_timeout: parse_env("GOFLET_UPLOAD_TIMEOUT", 7200u64)?,
            max_post_size: parse_env("GOFLET_MAX_POST_SIZE", 20_971_520i64)?,
        };

        let cache = CacheConfig {
            max_entries: parse_env("GOFLET_CACHE_MAX_ENTRIES", 100usize)?,
            default_ttl: parse_env("GOFLET_CACHE_DEFAULT_TTL", 60i64)?,
        };

        let image = ImageConfig {
            default_format: env::var("GOFLET_IMAGE_DEFAULT_FORMAT")
                .unwrap_or_else(|_| "jpeg".to_string()),
            allowed_formats: parse_list("GOFLET_IMAGE_ALLOWED_FORMATS", &["jpeg", "png", "gif"]),
            strict_mode: parse_env("GOFLET_IMAGE_STRICT_MODE", false)?,
            allowed_sizes: parse_num_list(
                "GOFLET_IMAGE_ALLOWED_SIZES",
                &[16, 32, 64, 128, 256, 512, 1024],
            )?,
            max_width: parse_env("GOFLET_IMAGE_MAX_WIDTH", 4096u32)?,
            max_height: parse_env("GOFLET_IMAGE_MAX_HEIGHT", 4096u32)?,
            max_file_size: parse_env("GOFLET_IMAGE_MAX_FILE_SIZE", 20_971_520i64)?,
        };

        let cron = CronConfig {
            delete_empty_folder: parse_env("GOFLET_CRON_DELETE_EMPTY_FOLDER", 3600i64)?,
            clean_outdated_file: parse_env("GOFLET_CRON_CLEAN_OUTDATED_FILE", 3600i64)?,
        };

        let client_cache = ClientCacheConfig {
            enabled: parse_env("GOFLET_CLIENT_CACHE_ENABLED", false)?,
            max_age: parse_env("GOFLET_CLIENT_CACHE_MAX_AGE", 3600u64)?,
        };

        let trusted_issuers = parse_list("GOFLET_JWT_TRUSTED_ISSUERS", &[]);
        let jwt = JwtConfig {
            enabled: parse_env("GOFLET_JWT_ENABLED", true)?,
            algorithm: env::var("GOFLET_JWT_ALGORITHM").unwrap_or_else(|_| "HS256".to_string()),
            signing_key: env::var("GOFLET_JWT_SIGNING_KEY").unwrap_or_else(|_| "goflet".to_string()),
            // An empty issuer list historically meant "trust any issuer";
            // the flag makes that behavior explicit and overridable.
            trust_any_issuer: parse_env("GOFLET_JWT_TRUST_ANY_ISSUER", trusted_issuers.is_empty())?,
            trusted_issuers,
        };

        Ok(Self {
            host,
            port,
            file,
            cache,
            image,
            cron,
            client_cache,
            jwt,
        })
    }
}

/// Parse an environment variable, falling back to a default when unset.
fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a valid value")),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated environment variable into a string list.
fn parse_list(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Parse a comma-separated environment variable into a numeric list.
fn parse_num_list(name: &str, default: &[u32]) -> Result<Vec<u32>> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse()
                    .with_context(|| format!("{name} must be a comma-separated list of integers"))
            })
            .collect(),
        Err(_) => Ok(default.to_vec()),
    }
}
