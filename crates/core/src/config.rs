//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Seconds to wait for in-flight requests after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ServerConfig {
    /// Get the shutdown grace period as a Duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Blob storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage. Buckets are subdirectories of `path`.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
        /// Base URL under which `path` is served (e.g., "http://cdn.local").
        /// Locators are `{public_base_url}/{bucket}/{name}` when set, otherwise
        /// the absolute file path.
        #[serde(default)]
        public_base_url: Option<String>,
    },
    /// S3-compatible storage (AWS, MinIO, ...).
    S3 {
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix inside each bucket.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
        /// Base URL used to build public locators. Defaults to `endpoint`.
        #[serde(default)]
        public_base_url: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                endpoint,
                access_key_id,
                secret_access_key,
                public_base_url,
                ..
            } => {
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => {}
                    _ => {
                        return Err("s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string());
                    }
                }
                if endpoint.is_none() && public_base_url.is_none() {
                    return Err(
                        "s3 config requires 'endpoint' or 'public_base_url' to build locators"
                            .to_string(),
                    );
                }
                Ok(())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Record store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Busy timeout in seconds while waiting for the database lock.
        #[serde(default = "default_sqlite_busy_timeout_secs")]
        busy_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host (e.g., "localhost" or "db.example.com").
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer ALMANAC_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_busy_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            busy_timeout_secs: default_sqlite_busy_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Upstream artifact source (APOD API) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// API key sent as the `api_key` query parameter.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Metadata endpoint; `date` and `api_key` are appended as query parameters.
    #[serde(default = "default_source_base_url")]
    pub base_url: String,
    /// Timeout for each upstream HTTP request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Download `hdurl` instead of `url` when the entry has one.
    #[serde(default)]
    pub prefer_hd: bool,
}

fn default_api_key() -> String {
    "DEMO_KEY".to_string()
}

fn default_source_base_url() -> String {
    "https://api.nasa.gov/planetary/apod".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            base_url: default_source_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            prefer_hd: false,
        }
    }
}

impl SourceConfig {
    /// Get the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate source configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("source.api_key cannot be empty".to_string());
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "source.base_url must be an http(s) URL, got {:?}",
                self.base_url
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err("source.request_timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Acquisition cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquireConfig {
    /// Bucket every artifact is stored in.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// How many times a waiter re-reads a pending record before giving up.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    /// Delay between two reads of a pending record, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on how long a single caller waits for an outcome.
    /// `None` waits for the flight to finish.
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
    /// Pending records older than this are released at startup.
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
}

fn default_bucket() -> String {
    "images".to_string()
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_stale_claim_secs() -> u64 {
    900 // 15 minutes
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_secs: None,
            stale_claim_secs: default_stale_claim_secs(),
        }
    }
}

impl AcquireConfig {
    /// Delay between poll attempts.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-caller wait deadline, if configured.
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }

    /// Age after which a pending record counts as abandoned.
    pub fn stale_claim_age(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.stale_claim_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Validate acquisition settings.
    pub fn validate(&self) -> Result<(), String> {
        validate_bucket_name(&self.bucket).map_err(|e| e.to_string())?;
        if self.poll_attempts == 0 {
            return Err("acquire.poll_attempts cannot be 0".to_string());
        }
        if self.wait_timeout_secs == Some(0) {
            return Err("acquire.wait_timeout_secs cannot be 0; omit it to disable".to_string());
        }
        if self.stale_claim_secs == 0 {
            return Err("acquire.stale_claim_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Check a bucket name against the S3 naming rules (3-63 chars, lowercase
/// letters, digits, dots and hyphens, alphanumeric at both ends).
pub fn validate_bucket_name(bucket: &str) -> crate::Result<()> {
    let invalid = |reason: &str| crate::Error::InvalidBucket(format!("{bucket:?}: {reason}"));

    if !(3..=63).contains(&bucket.len()) {
        return Err(invalid("must be 3-63 characters"));
    }
    if !bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(invalid(
            "only lowercase letters, digits, '.' and '-' are allowed",
        ));
    }
    let edges_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edges_ok(bucket.chars().next()) || !edges_ok(bucket.chars().last()) {
        return Err(invalid("must start and end with a letter or digit"));
    }
    if bucket.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    Ok(())
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Record store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Upstream source configuration.
    #[serde(default)]
    pub source: SourceConfig,
    /// Acquisition cache configuration.
    #[serde(default)]
    pub acquire: AcquireConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata and
    /// short poll settings.
    pub fn for_testing() -> Self {
        Self {
            acquire: AcquireConfig {
                poll_attempts: 5,
                poll_interval_ms: 20,
                ..AcquireConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> crate::Result<()> {
        self.storage
            .validate()
            .and_then(|()| self.metadata.validate())
            .and_then(|()| self.source.validate())
            .and_then(|()| self.acquire.validate())
            .map_err(crate::Error::Config)
    }
}
