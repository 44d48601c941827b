use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Object key layout
    #[serde(default)]
    pub key: KeyConfig,
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
    /// Expose Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Where a downloaded object is held between fetching and serving it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    #[default]
    Memory,
    /// Anonymous temporary file, unlinked when the payload is dropped
    TempFile,
}

/// S3 configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding the GPS data documents
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub buffer_mode: BufferMode,
    /// Upper bound for a single GetObject call, SDK default when unset
    pub operation_timeout_secs: Option<u64>,
}

/// Fixed segments of the object key.
///
/// Keys are laid out as
/// `{prefix}/{dataset}/{environment}/{user}/{vehicle}/{year}/{Month}/{day}/{filename}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyConfig {
    #[serde(default = "default_key_prefix")]
    pub prefix: String,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_filename")]
    pub filename: String,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "gps-gateway".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

fn default_bucket() -> String {
    "srihari03".to_string()
}

fn default_region() -> String {
    "ap-south-1".to_string()
}

fn default_key_prefix() -> String {
    "gps_data-20241008T164836Z-001".to_string()
}

fn default_dataset() -> String {
    "gps_data".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_filename() -> String {
    "gps_data.json".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8090
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(config::File::with_name("/etc/gps-gateway/gateway").required(false))
            // Override with environment variables
            // GATEWAY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the S3 operation timeout as Duration
    pub fn s3_operation_timeout(&self) -> Option<Duration> {
        self.s3.operation_timeout_secs.map(Duration::from_secs)
    }

    /// Address the API listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_enabled: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            buffer_mode: BufferMode::default(),
            operation_timeout_secs: None,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            prefix: default_key_prefix(),
            dataset: default_dataset(),
            environment: default_environment(),
            filename: default_filename(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}
