//! Error types and handling for the network server.
//!
//! Errors are split by how far they propagate. [`ServerError`] is fatal: it
//! stops the server from entering (or staying in) its serving state.
//! [`AdmissionError`] is scoped to a single admission attempt and is logged
//! and dropped by the tick that produced it.

use crate::connection::ClientId;
use std::io;
use std::net::SocketAddr;

/// Fatal server errors.
///
/// Every variant names the step that failed and, where one exists, the last
/// address or port that was tried.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Every candidate port was tried and none could be bound.
    #[error(
        "could not bind {transport} server: ports {first_port}..={last_port} exhausted after {attempts} attempts (last error: {source})"
    )]
    PortExhausted {
        transport: &'static str,
        first_port: u16,
        last_port: u16,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// The operating system refused to create a socket at all.
    #[error("failed to create {transport} socket: {source}")]
    SocketCreateFailed {
        transport: &'static str,
        #[source]
        source: io::Error,
    },

    /// A per-connection subsystem could not be initialized.
    #[error("failed to assemble connection context for client {client_id}: {source}")]
    ContextAssembly {
        client_id: ClientId,
        #[source]
        source: SubsystemError,
    },

    /// `update` or a registry operation was used before `init_network`.
    #[error("network has not been initialized")]
    NotInitialized,

    /// `init_network` was called twice.
    #[error("network already initialized on port {0}")]
    AlreadyInitialized(u16),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Recoverable, per-tick admission failures.
///
/// None of these leave a slot behind in the registry.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The rendezvous datagram could not be parsed.
    #[error("malformed handshake from {from}: {source}")]
    Malformed {
        from: SocketAddr,
        #[source]
        source: HandshakeError,
    },

    /// One of the punch-through socket steps failed.
    #[error("handshake step '{step}' failed for {addr}: {source}")]
    HandshakeStepFailed {
        step: HandshakeStep,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The registry already holds `max_connections` slots.
    #[error("registry full ({capacity} connections), rejecting {peer}")]
    RegistryFull { capacity: usize, peer: SocketAddr },

    /// `accept`/`recv_from` failed with something other than `WouldBlock`.
    #[error("transport poll failed: {0}")]
    Poll(#[source] io::Error),
}

/// The steps of the rendezvous handshake that perform socket I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Create,
    Bind,
    LocalAddr,
    Connect,
    Send,
}

impl std::fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandshakeStep::Create => "create",
            HandshakeStep::Bind => "bind",
            HandshakeStep::LocalAddr => "local_addr",
            HandshakeStep::Connect => "connect",
            HandshakeStep::Send => "send",
        };
        f.write_str(name)
    }
}

/// Reasons a rendezvous request fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("empty message")]
    Empty,

    #[error("message is not valid UTF-8")]
    NotUtf8,

    #[error("missing '{0}' key")]
    MissingKey(&'static str),

    #[error("'{0}' key has no value")]
    MissingValue(&'static str),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// Failure reported by a per-connection subsystem during initialization.
#[derive(Debug, thiserror::Error)]
#[error("{subsystem}: {reason}")]
pub struct SubsystemError {
    pub subsystem: &'static str,
    pub reason: String,
}

impl SubsystemError {
    pub fn new(subsystem: &'static str, reason: impl Into<String>) -> Self {
        Self {
            subsystem,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_exhausted_names_port_range() {
        let err = ServerError::PortExhausted {
            transport: "tcp",
            first_port: 9000,
            last_port: 9009,
            attempts: 10,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        let message = err.to_string();
        assert!(message.contains("9000..=9009"));
        assert!(message.contains("10 attempts"));
    }

    #[test]
    fn test_handshake_step_display() {
        assert_eq!(HandshakeStep::Connect.to_string(), "connect");
        assert_eq!(HandshakeStep::LocalAddr.to_string(), "local_addr");
    }
}
