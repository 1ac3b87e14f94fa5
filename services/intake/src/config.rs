use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration for the intake service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// File storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
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
    /// Prometheus exporter port; no exporter is started when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
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
    /// Value sent in `Access-Control-Allow-Origin`
    #[serde(default = "default_cors_allow_origin")]
    pub cors_allow_origin: String,
    /// Also mount the routes under `/api`, where the site calls them in production
    #[serde(default = "default_true")]
    pub route_prefix_aliases: bool,
    /// Request body cap in bytes; unlimited when unset
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
}

/// Where submissions are persisted
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding both files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// JSON array of contact messages, relative to `data_dir`
    #[serde(default = "default_messages_file")]
    pub messages_file: String,
    /// Newline-delimited analytics log, relative to `data_dir`
    #[serde(default = "default_analytics_file")]
    pub analytics_file: String,
}

// Default value functions
fn default_service_name() -> String {
    "intake-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5174
}

fn default_cors_allow_origin() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_messages_file() -> String {
    "messages.json".to_string()
}

fn default_analytics_file() -> String {
    "analytics.log".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let port_override = parse_port_override(std::env::var("PORT").ok())?;

        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", default_service_name())?
            .set_default("service.log_level", default_log_level())?
            .set_default("api.port", i64::from(default_api_port()))?
            // Add config file if present
            .add_source(config::File::with_name("config/intake").required(false))
            .add_source(config::File::with_name("/etc/beacon/intake").required(false))
            // Override with environment variables
            // INTAKE__STORAGE__DATA_DIR -> storage.data_dir
            .add_source(
                config::Environment::with_prefix("INTAKE")
                    .separator("__")
                    .try_parsing(true),
            )
            // Plain PORT wins, as on most hosting platforms
            .set_override_option("api.port", port_override)?
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Socket address string the API binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// A set but unparsable `PORT` is a startup error rather than a silent fallback
fn parse_port_override(raw: Option<String>) -> anyhow::Result<Option<i64>> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map(|port| Some(i64::from(port)))
            .map_err(|e| anyhow::anyhow!("Invalid PORT value {raw:?}: {e}")),
    }
}

impl StorageConfig {
    pub fn messages_path(&self) -> PathBuf {
        self.data_dir.join(&self.messages_file)
    }

    pub fn analytics_path(&self) -> PathBuf {
        self.data_dir.join(&self.analytics_file)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_allow_origin: default_cors_allow_origin(),
            route_prefix_aliases: default_true(),
            max_body_bytes: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            messages_file: default_messages_file(),
            analytics_file: default_analytics_file(),
        }
    }
}
