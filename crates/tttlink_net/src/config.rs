//! Network configuration.

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};
use tttlink_game::DEFAULT_MAX_FRAME_LEN;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 9999;

/// Settings for listening, dialing, and framing.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct NetConfig {
    /// TCP port to listen on and dial.
    #[serde(default = "default_port")]
    port: u16,

    /// Address to bind when hosting. Auto-detected when absent.
    #[serde(default)]
    bind_address: Option<IpAddr>,

    /// Seconds to wait for an outbound connection.
    #[serde(default = "default_dial_timeout_secs")]
    dial_timeout_secs: u64,

    /// Milliseconds between shutdown checks while waiting for a peer.
    #[serde(default = "default_accept_poll_ms")]
    accept_poll_ms: u64,

    /// Largest unterminated inbound fragment held before it is dropped.
    #[serde(default = "default_max_frame_len")]
    max_frame_len: usize,
}

#[instrument]
fn default_port() -> u16 {
    DEFAULT_PORT
}

#[instrument]
fn default_dial_timeout_secs() -> u64 {
    10
}

#[instrument]
fn default_accept_poll_ms() -> u64 {
    1000
}

#[instrument]
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            dial_timeout_secs: default_dial_timeout_secs(),
            accept_poll_ms: default_accept_poll_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl NetConfig {
    /// Loads configuration from a TOML file. Missing keys take defaults.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;

        info!(port = config.port, "Config loaded successfully");
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            debug!("No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Applies command-line overrides on top of the loaded values.
    #[instrument(skip(self))]
    pub fn with_overrides(mut self, port: Option<u16>, bind_address: Option<IpAddr>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        if bind_address.is_some() {
            self.bind_address = bind_address;
        }
        self
    }

    /// Dial timeout as a [`Duration`].
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// Accept poll interval as a [`Duration`].
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(*config.port(), 9999);
        assert_eq!(*config.bind_address(), None);
        assert_eq!(config.dial_timeout(), Duration::from_secs(10));
        assert_eq!(config.accept_poll(), Duration::from_secs(1));
        assert_eq!(*config.max_frame_len(), 64);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 4242").unwrap();
        writeln!(file, "bind_address = \"127.0.0.1\"").unwrap();

        let config = NetConfig::from_file(file.path()).unwrap();
        assert_eq!(*config.port(), 4242);
        assert_eq!(*config.bind_address(), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(*config.dial_timeout_secs(), 10);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        let err = NetConfig::from_file(file.path()).unwrap_err();
        assert!(err.message.contains("Failed to parse config"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NetConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, NetConfig::default());
    }

    #[test]
    fn test_overrides_replace_only_given_values() {
        let config = NetConfig::default().with_overrides(Some(5000), None);
        assert_eq!(*config.port(), 5000);
        assert_eq!(*config.bind_address(), None);

        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let config = config.with_overrides(None, Some(ip));
        assert_eq!(*config.port(), 5000);
        assert_eq!(*config.bind_address(), Some(ip));
    }
}
