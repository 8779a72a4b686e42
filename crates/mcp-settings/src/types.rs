//! Settings types.
//!
//! Every struct deserializes with `#[serde(default)]`, so a settings file
//! only needs the keys it overrides.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpSettings {
    /// Server name reported by discovery and the welcome frame.
    pub name: String,
    /// Server version reported by discovery.
    pub version: String,
    /// Network and transport settings.
    pub server: ServerSettings,
    /// Realtime authentication settings.
    pub auth: AuthSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            name: "mcp-gateway".to_string(),
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl McpSettings {
    /// Reject combinations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutSecs ({}) is shorter than server.heartbeatIntervalSecs ({})",
                self.server.heartbeat_timeout_secs, self.server.heartbeat_interval_secs
            )));
        }
        if self.auth.enabled && self.auth.tokens.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.enabled is set but auth.tokens is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Maximum concurrent realtime connections.
    pub max_connections: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a client is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before sends are dropped.
    pub send_queue_capacity: usize,
    /// Per-call deadline applied to built-in handlers, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_timeout_secs: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 100,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            handler_timeout_secs: None,
        }
    }
}

/// Realtime authentication settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Whether `request` frames require a prior successful `auth` frame.
    pub enabled: bool,
    /// Accepted bearer tokens mapped to the user ID they authenticate as.
    pub tokens: HashMap<String, String>,
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
