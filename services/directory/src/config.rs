use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the directory service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Image storage configuration
    #[serde(default)]
    pub images: ImageConfig,
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
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Metrics port (0 disables the exporter)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Which storage gateway backs the school table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Mysql,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    /// MySQL host
    #[serde(default = "default_db_host")]
    pub host: String,
    /// MySQL port
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Database user
    #[serde(default)]
    pub user: String,
    /// Database password
    #[serde(default)]
    pub password: Option<String>,
    /// Database (schema) name
    #[serde(default)]
    pub name: String,
    /// Use a connection pool instead of a fresh connection per statement
    #[serde(default)]
    pub pooled: bool,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Which image sink stores uploaded images
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    #[default]
    Local,
    S3,
}

/// Image storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub backend: ImageBackend,
    /// Delete the stored image when the database insert fails
    #[serde(default = "default_true")]
    pub cleanup_orphans: bool,
    #[serde(default)]
    pub local: LocalImageConfig,
    pub s3: Option<S3Config>,
}

/// Local filesystem image storage
#[derive(Debug, Clone, Deserialize)]
pub struct LocalImageConfig {
    /// Directory the images are written to (served publicly)
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    /// URL path prefix the public directory is served under
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

impl LocalImageConfig {
    /// URL prefix without trailing slashes, as mounted on the router
    pub fn route_prefix(&self) -> &str {
        self.url_prefix.trim_end_matches('/')
    }
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for school images
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix for uploaded images
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Public base URL objects are reachable under (CDN, MinIO gateway)
    pub public_base_url: Option<String>,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// HTTP API configuration
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
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body size
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "school-directory".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public/uploads")
}

fn default_url_prefix() -> String {
    "/uploads".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_folder() -> String {
    "schools".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Config {
    /// Load configuration from config files and the environment.
    ///
    /// Later sources override earlier ones:
    /// 1. `config/directory.*`
    /// 2. `/etc/school-directory/directory.*`
    /// 3. Environment variables, e.g. `DIRECTORY__DATABASE__HOST`
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/directory").required(false))
            .add_source(config::File::with_name("/etc/school-directory/directory").required(false))
            .add_source(
                config::Environment::with_prefix("DIRECTORY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.backend == DatabaseBackend::Mysql {
            if self.database.host.is_empty() {
                return Err(ConfigValidationError::MissingField("database.host".to_string()));
            }
            if self.database.user.is_empty() {
                return Err(ConfigValidationError::MissingField("database.user".to_string()));
            }
            if self.database.name.is_empty() {
                return Err(ConfigValidationError::MissingField("database.name".to_string()));
            }
            if self.database.pooled && self.database.max_connections == 0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: "database.max_connections".to_string(),
                    message: "Pool size must be greater than 0".to_string(),
                });
            }
        }

        match self.images.backend {
            ImageBackend::Local => {
                let prefix = self.images.local.route_prefix();
                if !prefix.starts_with('/') || prefix.len() < 2 || prefix.contains("//") {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "images.local.url_prefix".to_string(),
                        message: "Prefix must be a non-root path starting with '/'".to_string(),
                    });
                }
            }
            ImageBackend::S3 => {
                let s3 = self
                    .images
                    .s3
                    .as_ref()
                    .ok_or_else(|| ConfigValidationError::MissingField("images.s3".to_string()))?;
                if s3.bucket.is_empty() {
                    return Err(ConfigValidationError::MissingField("images.s3.bucket".to_string()));
                }
                if s3.part_size_bytes < 5 * 1024 * 1024 {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "images.s3.part_size_bytes".to_string(),
                        message: "S3 parts must be at least 5MB".to_string(),
                    });
                }
            }
        }

        if self.api.max_upload_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.max_upload_bytes".to_string(),
                message: "Upload limit must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Get database connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            host: default_db_host(),
            port: default_db_port(),
            user: String::new(),
            password: None,
            name: String::new(),
            pooled: false,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            run_migrations: true,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            backend: ImageBackend::default(),
            cleanup_orphans: true,
            local: LocalImageConfig::default(),
            s3: None,
        }
    }
}

impl Default for LocalImageConfig {
    fn default() -> Self {
        Self {
            public_dir: default_public_dir(),
            url_prefix: default_url_prefix(),
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
            max_upload_bytes: default_max_upload_bytes(),
        }
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
