//! Configuration management for the firehose ingest service.
//!
//! Configuration is loaded from config files (config/default.toml,
//! config/{RUN_MODE}.toml) and then overridden with environment variables
//! prefixed with FIREHOSE_ (e.g. FIREHOSE__STORAGE__BUCKET).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::watch::WatchMode;

/// Main configuration for the firehose service.
#[derive(Debug, Clone, Deserialize)]
pub struct FirehoseConfig {
    /// Jetstream connection configuration
    #[serde(default)]
    pub jetstream: JetstreamConfig,

    /// Watch-set configuration
    #[serde(default)]
    pub watch: WatchConfig,

    /// Window bucketing configuration
    #[serde(default)]
    pub window: WindowConfig,

    /// Object storage configuration
    pub storage: StorageConfig,

    /// Identity seed database (optional; static list only when absent)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Jetstream websocket connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamConfig {
    /// Subscribe endpoint URL (ws:// or wss://)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Record collections to subscribe to (wantedCollections)
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,

    /// Run duration budget in seconds
    #[serde(default = "default_run_duration_secs")]
    pub run_duration_secs: u64,

    /// Connect handshake timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Close the session if no frame arrives within this many seconds.
    /// Unset means block indefinitely on a stalled transport.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Connect retries after the first failure (0 = fail immediately)
    #[serde(default)]
    pub max_connect_attempts: u32,

    /// Base delay between connect retries in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Maximum delay between connect retries in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Watch-set configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Mirror (keep everything) or filtered (keep watched identities only)
    #[serde(default)]
    pub mode: WatchMode,

    /// Static identity allow-list, merged over the seed query result
    #[serde(default)]
    pub identities: Vec<String>,
}

/// Window bucketing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Window granularity in seconds
    #[serde(default = "default_granularity_secs")]
    pub granularity_secs: u32,
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// S3-compatible object storage
    #[default]
    S3,
    /// Local directory (development runs)
    Filesystem,
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend to write batches to
    #[serde(default)]
    pub backend: StorageBackend,

    /// Bucket name (required for the s3 backend)
    #[serde(default)]
    pub bucket: String,

    /// Object key prefix for batch objects
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,

    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,

    /// Output directory for the filesystem backend
    #[serde(default = "default_local_dir")]
    pub local_dir: String,
}

/// Identity seed database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_db_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// One-shot query returning the watched identity strings
    #[serde(default = "default_seed_query")]
    pub seed_query: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    #[serde(default)]
    pub enabled: bool,

    /// Port for the Prometheus scrape endpoint
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_endpoint() -> String {
    "wss://jetstream2.us-east.bsky.network/subscribe".to_string()
}
fn default_collections() -> Vec<String> {
    vec!["app.bsky.feed.post".to_string()]
}
fn default_run_duration_secs() -> u64 {
    600
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    30000
}
fn default_granularity_secs() -> u32 {
    60
}
fn default_prefix() -> String {
    "bsky".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_local_dir() -> String {
    "skeets".to_string()
}
fn default_max_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_seed_query() -> String {
    "SELECT did FROM watched_identities LIMIT 200".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            collections: default_collections(),
            run_duration_secs: default_run_duration_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: None,
            max_connect_attempts: 0,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::default(),
            identities: Vec::new(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            granularity_secs: default_granularity_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl FirehoseConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{RUN_MODE}.toml)
    /// 3. Environment variables (prefixed with FIREHOSE_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("FIREHOSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("FIREHOSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.jetstream.endpoint.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "jetstream.endpoint".to_string(),
            ));
        }
        if !self.jetstream.endpoint.starts_with("ws://")
            && !self.jetstream.endpoint.starts_with("wss://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "jetstream.endpoint".to_string(),
                message: "URL must start with ws:// or wss://".to_string(),
            });
        }

        if self.jetstream.collections.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "jetstream.collections".to_string(),
            ));
        }

        if self.jetstream.run_duration_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "jetstream.run_duration_secs".to_string(),
                message: "run duration must be greater than 0".to_string(),
            });
        }

        if self.window.granularity_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "window.granularity_secs".to_string(),
                message: "window granularity must be greater than 0".to_string(),
            });
        }

        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.bucket".to_string(),
            ));
        }

        if self.watch.mode == WatchMode::Filtered
            && self.watch.identities.is_empty()
            && self.database.is_none()
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "watch.identities".to_string(),
                message: "filtered mode needs a static identity list or a seed database"
                    .to_string(),
            });
        }

        Ok(())
    }
}

impl JetstreamConfig {
    /// Get the run duration budget as Duration.
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.run_duration_secs)
    }

    /// Get the connect timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the idle timeout as Duration, if configured.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Get the base connect-retry delay as Duration.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Get the maximum connect-retry delay as Duration.
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl DatabaseConfig {
    /// Get the connection timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
