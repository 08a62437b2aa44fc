//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize the acceptor and the admission side effects.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Port the server tries first.
pub const DEFAULT_SERVER_PORT: u16 = 9000;

/// Number of consecutive ports the bind-retry acquirer tries.
pub const DEFAULT_MAX_BIND_ATTEMPTS: u32 = 10;

/// Registry capacity, also used as the TCP listen backlog.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// The transport a server accepts clients over.
///
/// Selected once at startup; each variant has its own admission path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Connection-oriented: listen + non-blocking accept.
    Tcp,
    /// Connectionless: rendezvous handshake over a punch-through socket.
    Udp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "stream" => Ok(TransportKind::Tcp),
            "udp" | "datagram" => Ok(TransportKind::Udp),
            other => Err(ServerError::Config(format!(
                "unknown transport '{other}', expected 'tcp' or 'udp'"
            ))),
        }
    }
}

/// The level every newly admitted client is told to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelConfig {
    /// Human-readable level name
    pub name: String,
    /// Level asset reference
    pub file: String,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            name: "CharacterControl".to_string(),
            file: "ccontrollvl0.x_level.levela".to_string(),
        }
    }
}

/// Configuration structure for the network server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listening/rendezvous socket binds to
    pub bind_ip: IpAddr,

    /// First candidate port; the acquirer walks upward from here
    pub port: u16,

    /// Which admission path the server runs
    pub transport: TransportKind,

    /// How many consecutive ports to try before giving up
    pub max_bind_attempts: u32,

    /// Registry capacity and TCP listen backlog
    pub max_connections: usize,

    /// Timeout for connecting a punch-through socket, in milliseconds
    pub connect_timeout_ms: u64,

    /// Timeout for sending the rendezvous response, in milliseconds
    pub send_timeout_ms: u64,

    /// Level pushed to clients right after admission
    pub initial_level: LevelConfig,
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Checks values the acquirer and poller rely on.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_bind_attempts == 0 {
            return Err(ServerError::Config(
                "max_bind_attempts must be greater than 0".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        // Zero durations are rejected by the socket timeout calls.
        if self.connect_timeout_ms == 0 || self.send_timeout_ms == 0 {
            return Err(ServerError::Config(
                "connect_timeout_ms and send_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.initial_level.name.is_empty() || self.initial_level.file.is_empty() {
            return Err(ServerError::Config(
                "initial level name and file must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_SERVER_PORT,
            transport: TransportKind::Tcp,
            max_bind_attempts: DEFAULT_MAX_BIND_ATTEMPTS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_ms: 1000,
            send_timeout_ms: 500,
            initial_level: LevelConfig::default(),
        }
    }
}
