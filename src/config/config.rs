//! Configuration structures for the filter proxy.
//!
//! A [`Config`] is built from the four positional startup parameters and an
//! optional [`ProxySettings`] block, which can be deserialized from a TOML
//! file:
//!
//! ```toml
//! [proxy]
//! io_timeout_seconds = 10
//! max_request_bytes = 8192
//! relay_buffer_bytes = 4096
//! server_name = "webserver/1.0"
//! log_level = "debug"
//! ```
//!
//! ## Author
//! a13x.h.cc@gmail.com

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::pool::{MAX_POOL_SIZE, MIN_POOL_SIZE};

/// Value of the `Server` header on synthesized responses
pub const DEFAULT_SERVER_NAME: &str = "webserver/1.0";

const DEFAULT_MAX_REQUEST_BYTES: usize = 8192;
const DEFAULT_RELAY_BUFFER_BYTES: usize = 4096;

/// Error type for configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Number of worker threads
    pub pool_size: usize,
    /// Connections to accept before the process exits
    pub max_requests: usize,
    /// Filter file, re-read on every lookup
    pub filter_path: PathBuf,
    /// Tuning knobs
    pub proxy: ProxySettings,
}

/// Tuning knobs, all optional in the TOML file
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxySettings {
    /// Read/write/connect deadline. `None` keeps the no-timeout baseline.
    pub io_timeout_seconds: Option<u64>,
    /// Cap on the bytes read from a client before the header terminator
    pub max_request_bytes: usize,
    /// Chunk size used when relaying the upstream response
    pub relay_buffer_bytes: usize,
    pub server_name: String,
    pub log_level: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            io_timeout_seconds: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            relay_buffer_bytes: DEFAULT_RELAY_BUFFER_BYTES,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(default)]
    proxy: ProxySettings,
}

impl ProxySettings {
    /// Load tuning knobs from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse tuning knobs from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = toml::from_str(contents)?;
        Ok(file.proxy)
    }

    /// Deadline applied to socket operations, if configured
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Config {
    /// Build a configuration from the startup parameters with default tuning
    pub fn new(port: u16, pool_size: usize, max_requests: usize, filter_path: impl Into<PathBuf>) -> Self {
        Self {
            port,
            pool_size,
            max_requests,
            filter_path: filter_path.into(),
            proxy: ProxySettings::default(),
        }
    }

    /// Replace the tuning knobs
    pub fn with_settings(mut self, proxy: ProxySettings) -> Self {
        self.proxy = proxy;
        self
    }

    /// Semantic checks that serde and clap cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&self.pool_size) {
            return Err(ConfigError::Invalid(format!(
                "pool size must be between {} and {}, got {}",
                MIN_POOL_SIZE, MAX_POOL_SIZE, self.pool_size
            )));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid("max requests must be at least 1".to_string()));
        }
        if self.filter_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("filter path is empty".to_string()));
        }
        if self.proxy.max_request_bytes == 0 || self.proxy.relay_buffer_bytes == 0 {
            return Err(ConfigError::Invalid("buffer sizes must be non-zero".to_string()));
        }
        Ok(())
    }
}
