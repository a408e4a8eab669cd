#![deny(unsafe_code)]

//! Configuration loading and validation for panbridge.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure shared
//! by the bridge runtime, the IPC server and the `panctl` client.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Dispatch loop and signal relay settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Desktop notification settings.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Control socket settings.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Homeservers the proxy fronts. Their names key the users cache.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Dispatch loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interval between dispatch ticks, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Number of emitted signals retained for polling clients.
    #[serde(default = "default_signal_history")]
    pub signal_history: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            signal_history: default_signal_history(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_signal_history() -> usize {
    256
}

/// Desktop notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Whether to render desktop notifications for daemon signals.
    #[serde(default = "default_notifications_enabled")]
    pub enabled: bool,

    /// Application name reported to the notification server.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Path or name of the `notify-send` binary.
    #[serde(default = "default_notify_send_bin")]
    pub notify_send_bin: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_notifications_enabled(),
            app_name: default_app_name(),
            notify_send_bin: default_notify_send_bin(),
        }
    }
}

fn default_notifications_enabled() -> bool {
    true
}

fn default_app_name() -> String {
    "pantalaimon".to_string()
}

fn default_notify_send_bin() -> String {
    "notify-send".to_string()
}

/// Control socket configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Unix socket path. Falls back to the built-in default when unset.
    #[serde(default)]
    pub socket_path: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A homeserver fronted by the proxy.
///
/// ## TOML Example
///
/// ```toml
/// [[servers]]
/// name = "local-matrix"
/// homeserver = "https://matrix.example.org"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name, used as the key of the users cache.
    pub name: String,

    /// Homeserver URL the proxy forwards to.
    #[serde(default)]
    pub homeserver: String,
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.tick_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "bridge.tick_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.bridge.signal_history == 0 {
            return Err(ConfigError::Validation(
                "bridge.signal_history must be at least 1".to_string(),
            ));
        }

        if self.notifications.enabled && self.notifications.notify_send_bin.is_empty() {
            return Err(ConfigError::Validation(
                "notifications.notify_send_bin must not be empty when notifications are enabled"
                    .to_string(),
            ));
        }

        if let Some(path) = &self.ipc.socket_path {
            if path.is_empty() {
                return Err(ConfigError::Validation(
                    "ipc.socket_path must not be empty".to_string(),
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        let mut seen = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            if server.name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "servers[{i}].name must not be empty"
                )));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "servers[{i}].name {:?} is defined more than once",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Names of the configured servers, in declaration order.
    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }
}
