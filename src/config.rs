//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::console::ConsoleConfig;
use crate::events::{BrokerConfig, MAX_QUEUE_CAPACITY};
use crate::gateway::StreamConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub console: ConsoleConfig,

    /// Game servers whose consoles and streams this process serves
    #[serde(default)]
    pub servers: Vec<GameServerConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; any origin when empty
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One game server's console endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct GameServerConfig {
    pub id: Uuid,

    #[serde(default)]
    pub name: String,

    pub address: String,

    pub port: u16,

    #[serde(default)]
    pub credential: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate(path)?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("beacon").join("config.toml")),
            Some(PathBuf::from("/etc/beacon/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |error: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            error,
        };

        let capacities = [
            ("broker.queue_capacity", Some(self.broker.queue_capacity)),
            ("stream.outbound_capacity", Some(self.stream.outbound_capacity)),
            ("stream.queue_capacity", self.stream.queue_capacity),
        ];
        for (key, capacity) in capacities {
            if let Some(capacity) = capacity {
                if !(1..=MAX_QUEUE_CAPACITY).contains(&capacity) {
                    return Err(invalid(format!(
                        "{} must be between 1 and {}",
                        key, MAX_QUEUE_CAPACITY
                    )));
                }
            }
        }
        if self.stream.keepalive_ms == 0 {
            return Err(invalid("stream.keepalive_ms must be at least 1".to_string()));
        }

        for (i, server) in self.servers.iter().enumerate() {
            if self.servers[..i].iter().any(|other| other.id == server.id) {
                return Err(invalid(format!("duplicate server id {}", server.id)));
            }
            if server.address.trim().is_empty() {
                return Err(invalid(format!("server {} has an empty address", server.id)));
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // API overrides
        if let Some(host) = var("BEACON_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("BEACON_API_PORT").and_then(|p| p.parse().ok()) {
            self.api.port = port;
        }

        // Broker and stream overrides
        if let Some(capacity) = var("BEACON_QUEUE_CAPACITY").and_then(|c| c.parse().ok()) {
            self.broker.queue_capacity = capacity;
        }
        if let Some(ms) = var("BEACON_KEEPALIVE_MS").and_then(|ms| ms.parse().ok()) {
            self.stream.keepalive_ms = ms;
        }

        // Console overrides
        if let Some(ms) = var("BEACON_CONSOLE_CONNECT_TIMEOUT_MS").and_then(|ms| ms.parse().ok()) {
            self.console.connect_timeout_ms = ms;
        }
        if let Some(ms) = var("BEACON_CONSOLE_COMMAND_TIMEOUT_MS").and_then(|ms| ms.parse().ok()) {
            self.console.command_timeout_ms = ms;
        }

        // Logging overrides
        if let Some(level) = var("BEACON_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("BEACON_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid config file {path:?}: {error}")]
    Invalid { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Beacon Configuration
#
# Environment variables override these settings:
# - BEACON_API_HOST
# - BEACON_API_PORT
# - BEACON_QUEUE_CAPACITY
# - BEACON_KEEPALIVE_MS
# - BEACON_CONSOLE_CONNECT_TIMEOUT_MS
# - BEACON_CONSOLE_COMMAND_TIMEOUT_MS
# - BEACON_LOG_LEVEL
# - BEACON_LOG_FORMAT

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8082

# Allowed CORS origins (empty allows any origin)
cors_origins = []

[broker]
# Events buffered per subscriber before new events are dropped
queue_capacity = 100

[stream]
# Interval between keepalive frames (ms)
keepalive_ms = 30000

# Frames buffered between a stream and its client writer
outbound_capacity = 64

[console]
# Timeout for dialing and authenticating a console (ms)
connect_timeout_ms = 10000

# Timeout waiting for a command response (ms)
command_timeout_ms = 10000

# Reconnect backoff: delay doubles per attempt up to the maximum (ms)
reconnect_delay_ms = 1000
max_reconnect_delay_ms = 30000

# Reconnect attempts after a connection drops
max_reconnect_attempts = 5

# Game servers
# [[servers]]
# id = "5f0c6d2e-4d7a-4f5e-9b8a-2f1e3c4d5a6b"
# name = "Main"
# address = "127.0.0.1"
# port = 21025
# credential = "changeme"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
