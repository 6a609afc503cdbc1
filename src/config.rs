//! # Configuration Management
//!
//! Configuration for the connector, its transports and its handler filters.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - `REALTIME_PROTOCOL_*` environment overrides via `from_env()`
//!
//! Heartbeat and timeout options are whole seconds, as advertised to clients in
//! the handshake. Filter and shutdown timeouts are milliseconds.

use crate::error::{ProtocolError, Result};
use crate::protocol::heartbeat::HeartbeatSettings;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Heartbeat interval forced on UDP when none is configured.
pub const UDP_DEFAULT_HEARTBEAT_SECS: u64 = 20;

/// Heartbeat timeout forced on UDP when none is configured.
pub const UDP_DEFAULT_TIMEOUT_SECS: u64 = 100;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Listener and connection lifecycle settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Handler filter settings
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `REALTIME_PROTOCOL_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("REALTIME_PROTOCOL_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("REALTIME_PROTOCOL_PORT") {
            self.server.port = parse_env("REALTIME_PROTOCOL_PORT", &port)?;
        }
        if let Some(transport) = lookup("REALTIME_PROTOCOL_TRANSPORT") {
            self.server.transport = match transport.to_ascii_lowercase().as_str() {
                "hybrid" => TransportMode::Hybrid,
                "udp" => TransportMode::Udp,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "REALTIME_PROTOCOL_TRANSPORT: unknown transport '{other}'"
                    )))
                }
            };
        }
        if let Some(heartbeat) = lookup("REALTIME_PROTOCOL_HEARTBEAT") {
            self.server.heartbeat = parse_env("REALTIME_PROTOCOL_HEARTBEAT", &heartbeat)?;
        }
        if let Some(timeout) = lookup("REALTIME_PROTOCOL_TIMEOUT") {
            self.server.timeout = parse_env("REALTIME_PROTOCOL_TIMEOUT", &timeout)?;
        }
        if let Some(flag) = lookup("REALTIME_PROTOCOL_DISCONNECT_ON_TIMEOUT") {
            self.server.disconnect_on_timeout =
                parse_env("REALTIME_PROTOCOL_DISCONNECT_ON_TIMEOUT", &flag)?;
        }
        if let Some(max) = lookup("REALTIME_PROTOCOL_MAX_CONNECTIONS") {
            self.server.max_connections = parse_env("REALTIME_PROTOCOL_MAX_CONNECTIONS", &max)?;
        }
        if let Some(max) = lookup("REALTIME_PROTOCOL_MAX_PENDING_REQUESTS") {
            self.server.max_pending_requests =
                parse_env("REALTIME_PROTOCOL_MAX_PENDING_REQUESTS", &max)?;
        }
        if let Some(level) = lookup("REALTIME_PROTOCOL_LOG_LEVEL") {
            self.logging.log_level = level.parse().map_err(|_| {
                ProtocolError::ConfigError(format!("REALTIME_PROTOCOL_LOG_LEVEL: invalid level '{level}'"))
            })?;
        }
        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.filters.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtocolError::ConfigError(format!("{name}: invalid value '{value}'")))
}

/// Which listener the connector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// TCP and WebSocket clients on one TCP port
    Hybrid,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UdpType {
    Udp4,
    Udp6,
}

/// Listener and connection lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host (e.g., "127.0.0.1")
    pub host: String,

    /// Listen port; `0` picks a free port
    pub port: u16,

    pub transport: TransportMode,

    /// Address family for the UDP socket
    pub udp_type: UdpType,

    /// Heartbeat interval in seconds; `0` disables heartbeats
    pub heartbeat: u64,

    /// Heartbeat timeout in seconds; `0` means twice the interval
    pub timeout: u64,

    /// Close connections that stay silent past the heartbeat timeout
    pub disconnect_on_timeout: bool,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Requests a single connection may have queued or in flight; a client
    /// that goes past it is disconnected
    pub max_pending_requests: usize,

    /// Compress routes through the route dictionary
    pub use_dict: bool,

    /// Encode bodies through the schema tables
    pub use_protobuf: bool,

    /// JSON array of extra dictionary routes
    pub dictionary_path: Option<PathBuf>,

    /// Schema source for server-to-client messages
    pub server_protos_path: Option<PathBuf>,

    /// Schema source for client-to-server messages
    pub client_protos_path: Option<PathBuf>,

    /// Timeout for graceful shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 3010,
            transport: TransportMode::Hybrid,
            udp_type: UdpType::Udp4,
            heartbeat: 0,
            timeout: 0,
            disconnect_on_timeout: false,
            max_connections: 10_000,
            max_pending_requests: 256,
            use_dict: false,
            use_protobuf: false,
            dictionary_path: None,
            server_protos_path: None,
            client_protos_path: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Heartbeat settings in effect. UDP always runs heartbeats with
    /// disconnect-on-timeout because it has no other way to notice a peer
    /// going away.
    pub fn heartbeat_settings(&self) -> HeartbeatSettings {
        match self.transport {
            TransportMode::Udp => {
                let heartbeat = if self.heartbeat == 0 {
                    UDP_DEFAULT_HEARTBEAT_SECS
                } else {
                    self.heartbeat
                };
                let timeout = if self.timeout == 0 {
                    UDP_DEFAULT_TIMEOUT_SECS
                } else {
                    self.timeout
                };
                HeartbeatSettings::from_secs(heartbeat, timeout, true)
            }
            TransportMode::Hybrid => {
                HeartbeatSettings::from_secs(self.heartbeat, self.timeout, self.disconnect_on_timeout)
            }
        }
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Server host cannot be empty".to_string());
        }

        if self.transport == TransportMode::Udp {
            let is_v6 = self.host.contains(':');
            match (self.udp_type, is_v6) {
                (UdpType::Udp4, true) => {
                    errors.push(format!("udp4 socket cannot bind IPv6 host '{}'", self.host))
                }
                (UdpType::Udp6, false) if self.host.parse::<std::net::Ipv4Addr>().is_ok() => {
                    errors.push(format!("udp6 socket cannot bind IPv4 host '{}'", self.host))
                }
                _ => {}
            }
        }

        if self.heartbeat > 3600 {
            errors.push("Heartbeat interval too long (maximum: 3600s)".to_string());
        }

        if self.heartbeat > 0 && self.timeout > 0 && self.timeout <= self.heartbeat {
            errors.push(format!(
                "Heartbeat timeout ({}s) must be longer than the interval ({}s)",
                self.timeout, self.heartbeat
            ));
        }

        if self.disconnect_on_timeout && self.heartbeat == 0 && self.transport == TransportMode::Hybrid {
            errors.push("disconnect_on_timeout has no effect with heartbeats disabled".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 1_000_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.max_pending_requests == 0 {
            errors.push("Max pending requests must be greater than 0".to_string());
        }

        if self.use_protobuf && self.server_protos_path.is_none() && self.client_protos_path.is_none() {
            errors.push("use_protobuf is set but no schema paths are configured".to_string());
        }

        for path in [&self.dictionary_path, &self.server_protos_path, &self.client_protos_path]
            .into_iter()
            .flatten()
        {
            if !path.exists() {
                errors.push(format!("File does not exist: {}", path.display()));
            }
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Handler filter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Serialize requests per connection
    pub serial: bool,

    /// How long a request may hold its connection's queue
    #[serde(with = "duration_serde")]
    pub serial_timeout: Duration,

    /// Warn about requests that outlive `request_timeout`
    pub timeout: bool,

    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum number of requests tracked at once by the timeout filter
    pub max_size: usize,

    /// Log the time used by each request
    pub time: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            serial: true,
            serial_timeout: Duration::from_millis(3000),
            timeout: false,
            request_timeout: Duration::from_millis(3000),
            max_size: 500,
            time: false,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.serial && self.serial_timeout.as_millis() < 10 {
            errors.push("Serial timeout too short (minimum: 10ms)".to_string());
        }

        if self.timeout {
            if self.request_timeout.as_millis() < 10 {
                errors.push("Request timeout too short (minimum: 10ms)".to_string());
            }
            if self.max_size == 0 {
                errors.push("Timeout filter max_size must be greater than 0".to_string());
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level used when `RUST_LOG` is not set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("realtime-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
