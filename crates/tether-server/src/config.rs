//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tether_exchange::DEFAULT_REQUEST_TIMEOUT;
use thiserror::Error;
use url::Url;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// How this instance talks to partner instances.
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tether_exchange=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Exchange protocol settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Base URL partners use to reach this instance. Sent as the consumer
    /// endpoint of every request we submit and as the sender of every
    /// stream status change.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Upper bound on every call to a partner instance.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ExchangeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "tether.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_public_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            public_url: default_public_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TETHER_HOST` overrides `server.host`
/// - `TETHER_PORT` overrides `server.port`
/// - `TETHER_DB_PATH` overrides `database.path`
/// - `TETHER_LOG_LEVEL` overrides `logging.level`
/// - `TETHER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TETHER_PUBLIC_URL` overrides `exchange.public_url`
/// - `TETHER_REQUEST_TIMEOUT_MS` overrides `exchange.request_timeout_ms`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the resulting configuration fails validation.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("TETHER_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("TETHER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("TETHER_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("TETHER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("TETHER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = var("TETHER_PUBLIC_URL") {
        config.exchange.public_url = url;
    }
    if let Some(timeout) = var("TETHER_REQUEST_TIMEOUT_MS") {
        if let Ok(parsed) = timeout.parse() {
            config.exchange.request_timeout_ms = parsed;
        }
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let url = Url::parse(&config.exchange.public_url).map_err(|e| {
        ConfigError::Invalid(format!(
            "exchange.public_url {:?} is not a URL: {}",
            config.exchange.public_url, e
        ))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "exchange.public_url must be http or https, got {}",
            url.scheme()
        )));
    }
    if config.exchange.request_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "exchange.request_timeout_ms must be positive".to_string(),
        ));
    }
    if config.database.pool_max_size == 0 {
        return Err(ConfigError::Invalid(
            "database.pool_max_size must be positive".to_string(),
        ));
    }
    Ok(())
}
