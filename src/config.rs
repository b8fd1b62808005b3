//! Host Configuration
//!
//! Handles parsing and management of evhost.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Name of the configuration file searched for by [`HostConfig::load_from_cwd`].
pub const CONFIG_FILE_NAME: &str = "evhost.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching evhost.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    /// Event loop tuning
    #[serde(default)]
    pub reactor: ReactorConfig,

    /// TCP listener settings
    #[serde(default)]
    pub net: NetConfig,

    /// HTTP client and server settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: HostConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Event loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorConfig {
    /// Maximum readiness events collected per poll
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Bytes requested per socket read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_max_events() -> usize {
    1024
}

fn default_read_chunk_size() -> usize {
    64 * 1024
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

/// TCP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Pending-connection queue length passed to listen(2)
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,

    /// Address servers bind to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
}

fn default_listen_backlog() -> i32 {
    10
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen_backlog: default_listen_backlog(),
            bind_host: default_bind_host(),
        }
    }
}

/// HTTP client and server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Port used when a URL does not name one
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Body written by `res.end()` when called without one
    #[serde(default = "default_response_body")]
    pub response_body: String,

    /// Longest request line the server accepts, in bytes
    #[serde(default = "default_max_request_line")]
    pub max_request_line: usize,
}

fn default_port() -> u16 {
    80
}

fn default_response_body() -> String {
    "Hello, World!".to_string()
}

fn default_max_request_line() -> usize {
    8192
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            response_body: default_response_body(),
            max_request_line: default_max_request_line(),
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when neither `RUST_LOG` nor `-v` is given
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
