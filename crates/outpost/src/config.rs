//! Configuration management for the Outpost server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use crate::cli::CliArgs;
use outpost_net::config::{
    LevelConfig, DEFAULT_MAX_BIND_ATTEMPTS, DEFAULT_MAX_CONNECTIONS, DEFAULT_SERVER_PORT,
};
use outpost_net::{ServerConfig, TransportKind};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default tick interval for serde deserialization
fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_diagnostics_interval() -> u64 {
    60
}

fn default_max_bind_attempts() -> u32 {
    DEFAULT_MAX_BIND_ATTEMPTS
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_send_timeout() -> u64 {
    500
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Level pushed to every admitted client
    #[serde(default)]
    pub level: LevelConfig,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls the endpoint, admission limits, and tick timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// IP address to bind the endpoint to (e.g., "0.0.0.0")
    pub bind_address: String,
    /// First port tried; the next free port above it is used if taken
    pub port: u16,
    /// Transport to accept clients over ("tcp" or "udp")
    pub transport: String,
    /// Number of consecutive ports tried before giving up
    #[serde(default = "default_max_bind_attempts")]
    pub max_bind_attempts: u32,
    /// Maximum number of admitted clients
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Punch-through connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Rendezvous response send timeout in milliseconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    /// Server tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Seconds between diagnostics reports (0 to disable)
    #[serde(default = "default_diagnostics_interval")]
    pub diagnostics_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_SERVER_PORT,
            transport: TransportKind::Tcp.to_string(),
            max_bind_attempts: default_max_bind_attempts(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout(),
            send_timeout_ms: default_send_timeout(),
            tick_interval_ms: default_tick_interval(),
            diagnostics_interval_secs: default_diagnostics_interval(),
        }
    }
}

impl ServerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// `None` when periodic diagnostics are disabled.
    pub fn diagnostics_interval(&self) -> Option<Duration> {
        (self.diagnostics_interval_secs > 0)
            .then(|| Duration::from_secs(self.diagnostics_interval_secs))
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(transport) = &args.transport {
            self.server.transport = transport.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Converts the application configuration to a network server
    /// configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let config = ServerConfig {
            bind_ip: self.server.bind_address.parse::<IpAddr>()?,
            port: self.server.port,
            transport: self.server.transport.parse::<TransportKind>()?,
            max_bind_attempts: self.server.max_bind_attempts,
            max_connections: self.server.max_connections,
            connect_timeout_ms: self.server.connect_timeout_ms,
            send_timeout_ms: self.server.send_timeout_ms,
            initial_level: self.level.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration settings.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error message describing
    /// the validation failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<IpAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if let Err(e) = self.server.transport.parse::<TransportKind>() {
            return Err(e.to_string());
        }

        if self.server.tick_interval_ms == 0 {
            return Err("server.tick_interval_ms must be greater than 0".to_string());
        }

        if self.level.name.is_empty() || self.level.file.is_empty() {
            return Err("level.name and level.file cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
