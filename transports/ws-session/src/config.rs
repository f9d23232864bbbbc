//! Configuration types for sessions and the signaling server

use crate::lifecycle::ReconnectPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default maximum incoming payload size (16 MiB)
pub const DEFAULT_MAX_INCOMING_PAYLOAD: usize = 16 * 1024 * 1024;

/// Main configuration for a `Session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session name used in logs and thread names
    pub name: String,

    /// Default server URL (ws:// or wss://), used by the client binary
    pub url: String,

    /// Reconnect policy
    pub reconnect: ReconnectPolicy,

    /// Per-connection transport options
    pub connection: ConnectionOptions,
}

/// Options applied to every connection a session opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Maximum size of an incoming message in bytes (default: 16 MiB)
    pub max_incoming_payload_bytes: usize,

    /// Keepalive ping interval in milliseconds, 0 disables (default: 1000)
    pub keepalive_interval_ms: u64,

    /// Connect (TCP + TLS + handshake) timeout in milliseconds (default: 10000)
    pub connect_timeout_ms: u64,

    /// Time allowed for a close handshake during teardown (default: 1000)
    pub close_timeout_ms: u64,
}

/// Configuration for the `SignalingServer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0)
    pub bind_address: String,

    /// TCP port, 0 picks a free port (default: 8088)
    pub port: u16,

    /// Request path accepted for WebSocket upgrades (default: /test)
    pub path: String,

    /// Maximum size of an incoming message in bytes (default: 16 MiB)
    pub max_incoming_payload_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "ws-session".to_string(),
            url: String::new(),
            reconnect: ReconnectPolicy::default(),
            connection: ConnectionOptions::default(),
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_incoming_payload_bytes: DEFAULT_MAX_INCOMING_PAYLOAD,
            keepalive_interval_ms: 1000,
            connect_timeout_ms: 10000,
            close_timeout_ms: 1000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8088,
            path: "/test".to_string(),
            max_incoming_payload_bytes: DEFAULT_MAX_INCOMING_PAYLOAD,
        }
    }
}

impl ConnectionOptions {
    /// Keepalive interval, `None` when disabled
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl SessionConfig {
    /// Create a configuration with the given session name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `name` is empty
    /// - `url` is set but is not a ws:// or wss:// URL
    /// - `max_incoming_payload_bytes` is 0
    /// - `connect_timeout_ms` is 0
    /// - the reconnect policy is invalid
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("session name must not be empty".to_string()));
        }

        if !self.url.is_empty() && !is_websocket_url(&self.url) {
            return Err(Error::InvalidConfig(format!(
                "url must start with ws:// or wss://, got {}",
                self.url
            )));
        }

        if self.connection.max_incoming_payload_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_incoming_payload_bytes must be greater than 0".to_string(),
            ));
        }

        if self.connection.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.reconnect.validate()
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Parse a configuration from TOML
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Load a configuration file; `.toml` files are parsed as TOML,
    /// everything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            _ => Self::from_json_str(&text),
        }
    }

    /// Set the default server URL
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the keepalive interval (0 disables keepalive pings)
    pub fn with_keepalive_interval_ms(mut self, interval_ms: u64) -> Self {
        self.connection.keepalive_interval_ms = interval_ms;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connection.connect_timeout_ms = timeout_ms;
        self
    }
}

impl ServerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "server path must start with '/', got {}",
                self.path
            )));
        }

        if self.max_incoming_payload_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_incoming_payload_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration for a loopback server on a free port
    pub fn loopback(path: &str) -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            path: path.to_string(),
            ..Default::default()
        }
    }
}

pub(crate) fn is_websocket_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}
