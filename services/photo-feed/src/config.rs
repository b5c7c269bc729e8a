use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the photo feed service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Inbox directory configuration
    #[serde(default)]
    pub inbox: InboxConfig,
    /// Processing queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Image transform configuration
    #[serde(default)]
    pub transform: TransformConfig,
    /// Feed window configuration
    #[serde(default)]
    pub feed: FeedConfig,
    /// Store backend selection
    #[serde(default)]
    pub store: StoreConfig,
    /// Database configuration (required for the postgres backend)
    pub database: Option<DatabaseConfig>,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port, disabled when unset
    pub metrics_port: Option<u16>,
}

/// Inbox directory configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InboxConfig {
    /// Directory watched for new photos
    #[serde(default = "default_inbox_path")]
    pub path: PathBuf,
    /// Create the inbox (and processed dir) on startup if missing
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    /// Files must be strictly larger than this to count as photos
    #[serde(default = "default_min_file_bytes")]
    pub min_file_bytes: u64,
    /// Where published files are moved; files stay in the inbox when unset
    pub processed_dir: Option<PathBuf>,
}

/// Processing queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of pending paths (unbounded when unset)
    pub capacity: Option<usize>,
    /// Idle backoff between empty-queue checks in milliseconds
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
}

/// Image transform configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    /// Maximum output width in pixels
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// JPEG quality for the encoded output (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Feed window configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// How long each photo stays visible, in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

/// Store backend kind
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local append-only store
    #[default]
    Memory,
    /// PostgreSQL-backed store
    Postgres,
}

/// Store configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    /// Erase all stored photos on startup
    #[serde(default = "default_true")]
    pub reset_on_startup: bool,
    /// CA certificate used to verify the server
    pub ssl_root_cert: Option<PathBuf>,
    /// Client certificate for mutual TLS
    pub ssl_client_cert: Option<PathBuf>,
    /// Client private key for mutual TLS
    pub ssl_client_key: Option<PathBuf>,
}

/// API configuration for the feed endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "photo-feed".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_inbox_path() -> PathBuf {
    PathBuf::from("data/inbox")
}

fn default_min_file_bytes() -> u64 {
    50400
}

fn default_idle_interval_ms() -> u64 {
    50
}

fn default_max_width() -> u32 {
    700
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_ttl_ms() -> u64 {
    15000
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3001
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/photo-feed").required(false))
            .add_source(config::File::with_name("/etc/photo-feed/photo-feed").required(false))
            // PHOTO_FEED__FEED__TTL_MS -> feed.ttl_ms
            .add_source(
                config::Environment::with_prefix("PHOTO_FEED")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.feed.ttl_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "feed.ttl_ms".to_string(),
                message: "TTL must be greater than 0".to_string(),
            });
        }

        if self.transform.max_width == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "transform.max_width".to_string(),
                message: "Width must be greater than 0".to_string(),
            });
        }

        if !(1..=100).contains(&self.transform.jpeg_quality) {
            return Err(ConfigValidationError::InvalidValue {
                field: "transform.jpeg_quality".to_string(),
                message: "Quality must be between 1 and 100".to_string(),
            });
        }

        if self.queue.idle_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "queue.idle_interval_ms".to_string(),
                message: "Idle interval must be greater than 0".to_string(),
            });
        }

        if self.queue.capacity == Some(0) {
            return Err(ConfigValidationError::InvalidValue {
                field: "queue.capacity".to_string(),
                message: "Capacity must be greater than 0 when set".to_string(),
            });
        }

        if self.inbox.path.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField("inbox.path".to_string()));
        }

        if self.store.backend == StoreBackend::Postgres {
            match &self.database {
                None => {
                    return Err(ConfigValidationError::MissingField("database".to_string()));
                }
                Some(db) if db.url.is_empty() => {
                    return Err(ConfigValidationError::MissingField(
                        "database.url".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Get the record TTL as Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.feed.ttl_ms)
    }

    /// Get the idle backoff as Duration
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.queue.idle_interval_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            path: default_inbox_path(),
            create_if_missing: true,
            min_file_bytes: default_min_file_bytes(),
            processed_dir: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            idle_interval_ms: default_idle_interval_ms(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.feed.ttl_ms, 15000);
        assert_eq!(config.inbox.min_file_bytes, 50400);
        assert_eq!(config.transform.max_width, 700);
        assert_eq!(config.api.port, 3001);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.queue.capacity.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = Config::default();
        config.feed.ttl_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.queue.capacity = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_postgres_requires_database() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Postgres;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let raw = r#"
            [feed]
            ttl_ms = 30000

            [store]
            backend = "postgres"

            [database]
            url = "postgres://localhost/photos"
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.feed.ttl_ms, 30000);
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.inbox.min_file_bytes, 50400);
        let db = config.database.as_ref().unwrap();
        assert!(db.reset_on_startup);
        assert_eq!(db.max_connections, 10);
        assert!(config.validate().is_ok());
    }
}
