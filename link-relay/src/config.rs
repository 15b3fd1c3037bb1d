//! Configuration loading for heartlink-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Every section and field is optional; missing values use the defaults below.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for heartlink-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Live channel configuration.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Rate limiting and input bounds.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Caller identity resolution.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Push notification dispatch.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Enable the metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Maximum pooled connections (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Live channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Frames buffered per connection before it is evicted as stalled (default: 256).
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Capacity of the registry control channel (default: 1024).
    #[serde(default = "default_control_buffer")]
    pub control_buffer: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Love events a user may send per minute (default: 60).
    #[serde(default = "default_love_per_minute")]
    pub love_per_minute: u32,
    /// Pair requests a user may create per minute (default: 10).
    #[serde(default = "default_pair_requests_per_minute")]
    pub pair_requests_per_minute: u32,
    /// Requests per second across all clients (default: 200).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Longest accepted love event in seconds (default: 86400).
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u32,
}

/// Caller identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the authenticated user id, set by the upstream gateway
    /// (default: `x-user-id`).
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

/// Push notification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Push gateway endpoint. Notifications are only logged when unset.
    pub webhook_url: Option<String>,
    /// Request timeout for the push gateway in seconds (default: 10).
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
    /// Notification title (default: "Love Connection").
    #[serde(default = "default_notify_title")]
    pub title: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("heartlink.db")
}

fn default_max_connections() -> u32 {
    10
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_control_buffer() -> usize {
    1024
}

fn default_love_per_minute() -> u32 {
    60
}

fn default_pair_requests_per_minute() -> u32 {
    10
}

fn default_global_requests_per_second() -> u32 {
    200
}

fn default_max_duration_secs() -> u32 {
    24 * 60 * 60
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_notify_title() -> String {
    "Love Connection".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            control_buffer: default_control_buffer(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            love_per_minute: default_love_per_minute(),
            pair_requests_per_minute: default_pair_requests_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notify_timeout_secs(),
            title: default_notify_title(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.realtime.outbound_buffer, 256);
        assert_eq!(config.limits.max_duration_secs, 86_400);
        assert_eq!(config.auth.identity_header, "x-user-id");
        assert!(config.notifications.webhook_url.is_none());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"

[storage]
database = "/data/heartlink.db"

[realtime]
outbound_buffer = 16

[limits]
love_per_minute = 5

[auth]
identity_header = "x-auth-user"

[notifications]
webhook_url = "https://push.internal/send"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.storage.database, PathBuf::from("/data/heartlink.db"));
        assert_eq!(config.realtime.outbound_buffer, 16);
        assert_eq!(config.limits.love_per_minute, 5);
        assert_eq!(config.auth.identity_header, "x-auth-user");
        assert_eq!(
            config.notifications.webhook_url.as_deref(),
            Some("https://push.internal/send")
        );
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.storage.max_connections, 10);
        assert_eq!(config.realtime.control_buffer, 1024);
        assert_eq!(config.notifications.title, "Love Connection");
    }

    #[test]
    fn missing_fields_in_present_sections_use_defaults() {
        let toml = r#"
[limits]
pair_requests_per_minute = 3
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.limits.pair_requests_per_minute, 3);
        assert_eq!(config.limits.love_per_minute, 60);
        assert_eq!(config.limits.global_requests_per_second, 200);
    }

    #[test]
    fn sample_config_matches_defaults() {
        let config: Config = toml::from_str(include_str!("../../relay.toml")).unwrap();
        let defaults = Config::default();
        assert_eq!(config.server.bind_address, defaults.server.bind_address);
        assert_eq!(config.realtime.outbound_buffer, defaults.realtime.outbound_buffer);
        assert_eq!(config.limits.max_duration_secs, defaults.limits.max_duration_secs);
        assert!(config.notifications.webhook_url.is_none());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[server\nbind_address = 1").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
