//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default backend dial timeout in seconds
pub const DEFAULT_BACKEND_TIMEOUT: u64 = 5;

/// Default forwarder idle read timeout in seconds (0 disables)
pub const DEFAULT_CONN_READ_TIMEOUT: u64 = 30;

/// Default cap on the accumulated HTTP preamble in bytes
pub const DEFAULT_MAX_HTTP_HEADER_SIZE: usize = 8192;

/// Smallest accepted preamble cap; lower configured values are raised to this
pub const MIN_HTTP_HEADER_SIZE: usize = 32;

/// Main configuration
///
/// Read once at startup and shared immutably with every connection handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared secret, the passphrase fed into EVP_BytesToKey
    #[serde(default)]
    pub secret: String,
    /// Listener port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Backend dial timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout: u64,
    /// Forwarder idle read timeout in seconds; 0 disables
    #[serde(default = "default_conn_read_timeout")]
    pub conn_read_timeout: u64,
    /// Cap on the accumulated HTTP preamble in bytes
    #[serde(default = "default_max_http_header_size")]
    pub max_http_header_size: usize,
}

fn default_listen_port() -> u16 {
    crate::DEFAULT_PORT
}

fn default_backend_timeout() -> u64 {
    DEFAULT_BACKEND_TIMEOUT
}

fn default_conn_read_timeout() -> u64 {
    DEFAULT_CONN_READ_TIMEOUT
}

fn default_max_http_header_size() -> usize {
    DEFAULT_MAX_HTTP_HEADER_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret: String::new(),
            listen_port: default_listen_port(),
            backend_timeout: default_backend_timeout(),
            conn_read_timeout: default_conn_read_timeout(),
            max_http_header_size: default_max_http_header_size(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check required fields and raise out-of-range values to their floors
    pub fn validate(&mut self) -> Result<(), crate::Error> {
        if self.secret.is_empty() {
            return Err(crate::Error::Config("secret must not be empty".to_string()));
        }
        if self.max_http_header_size < MIN_HTTP_HEADER_SIZE {
            self.max_http_header_size = MIN_HTTP_HEADER_SIZE;
        }
        Ok(())
    }

    /// Address string for the listener bind
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.listen_port)
    }

    /// Backend dial timeout budget
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout)
    }

    /// Per-read idle timeout for forwarders; `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.conn_read_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
