//! Bind-retry acquisition of the server endpoint.
//!
//! Tries `create → bind → listen` on consecutive ports starting at the
//! configured one. A port conflict moves on to the next candidate; failing to
//! create a socket at all is fatal straight away.

use super::{EndpointSocket, ServerEndpoint};
use crate::config::{ServerConfig, TransportKind};
use crate::error::ServerError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, info};

/// Outcome of a single failed bind attempt.
#[derive(Debug)]
pub enum BindAttemptError {
    /// No socket could be created; retrying another port cannot help.
    Create(io::Error),
    /// The socket was created but bind/listen failed on this port.
    Bind(io::Error),
}

/// Acquires the server endpoint described by `config`.
///
/// On success exactly one non-blocking socket is held, in the listening
/// state for TCP. On failure every socket created along the way has been
/// dropped.
pub fn acquire(config: &ServerConfig) -> Result<ServerEndpoint, ServerError> {
    let kind = config.transport;
    let backlog = i32::try_from(config.max_connections).unwrap_or(i32::MAX);
    let endpoint = acquire_with(kind, config.port, config.max_bind_attempts, |port| {
        bind_endpoint(kind, config.bind_ip, port, backlog)
    })?;
    info!(
        "🔌 {} endpoint bound on {}:{}",
        kind,
        config.bind_ip,
        endpoint.port()
    );
    Ok(endpoint)
}

/// Runs the retry loop over `attempt`, one call per candidate port.
///
/// Candidates are `start_port`, `start_port + 1`, … up to `max_attempts`
/// ports (fewer if the port range ends first).
pub fn acquire_with<T, F>(
    transport: TransportKind,
    start_port: u16,
    max_attempts: u32,
    mut attempt: F,
) -> Result<T, ServerError>
where
    F: FnMut(u16) -> Result<T, BindAttemptError>,
{
    let mut port = start_port;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match attempt(port) {
            Ok(bound) => return Ok(bound),
            Err(BindAttemptError::Create(source)) => {
                return Err(ServerError::SocketCreateFailed {
                    transport: transport.as_str(),
                    source,
                });
            }
            Err(BindAttemptError::Bind(source)) => source,
        };

        debug!(
            "{} bind attempt {}/{} on port {} failed: {}",
            transport, attempts, max_attempts, port, last_error
        );

        let next_port = port.checked_add(1);
        match next_port {
            Some(next) if attempts < max_attempts => port = next,
            _ => {
                return Err(ServerError::PortExhausted {
                    transport: transport.as_str(),
                    first_port: start_port,
                    last_port: port,
                    attempts,
                    source: last_error,
                });
            }
        }
    }
}

/// One `create → bind → (listen)` attempt on a single port.
fn bind_endpoint(
    kind: TransportKind,
    ip: IpAddr,
    port: u16,
    backlog: i32,
) -> Result<ServerEndpoint, BindAttemptError> {
    let addr = SocketAddr::new(ip, port);
    let (ty, protocol) = match kind {
        TransportKind::Tcp => (Type::STREAM, Protocol::TCP),
        TransportKind::Udp => (Type::DGRAM, Protocol::UDP),
    };

    let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol))
        .map_err(BindAttemptError::Create)?;
    socket.bind(&addr.into()).map_err(BindAttemptError::Bind)?;
    if kind == TransportKind::Tcp {
        socket.listen(backlog).map_err(BindAttemptError::Bind)?;
    }
    socket.set_nonblocking(true).map_err(BindAttemptError::Bind)?;

    // Port 0 asks the OS for an ephemeral port; report what we actually got.
    let bound_port = socket
        .local_addr()
        .ok()
        .and_then(|local| local.as_socket())
        .map(|local| local.port())
        .unwrap_or(port);

    let socket = match kind {
        TransportKind::Tcp => EndpointSocket::Stream(socket.into()),
        TransportKind::Udp => EndpointSocket::Datagram(socket.into()),
    };
    Ok(ServerEndpoint::new(socket, bound_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_BIND_ATTEMPTS;
    use std::net::{Ipv4Addr, TcpListener, UdpSocket};

    fn in_use() -> BindAttemptError {
        BindAttemptError::Bind(io::Error::from(io::ErrorKind::AddrInUse))
    }

    #[test]
    fn test_port_permanently_in_use_tries_ten_ports() {
        let mut tried = Vec::new();
        let result: Result<(), _> = acquire_with(TransportKind::Tcp, 9000, 10, |port| {
            tried.push(port);
            Err(in_use())
        });

        assert_eq!(tried, (9000..=9009).collect::<Vec<u16>>());
        match result {
            Err(ServerError::PortExhausted {
                first_port,
                last_port,
                attempts,
                ..
            }) => {
                assert_eq!(first_port, 9000);
                assert_eq!(last_port, 9009);
                assert_eq!(attempts, 10);
            }
            other => panic!("expected PortExhausted, got {other:?}"),
        }
    }

    #[test]
    fn test_retry_stops_at_first_free_port() {
        let mut tried = Vec::new();
        let port = acquire_with(TransportKind::Udp, 9000, 10, |port| {
            tried.push(port);
            if port < 9003 {
                Err(in_use())
            } else {
                Ok(port)
            }
        })
        .unwrap();

        assert_eq!(port, 9003);
        assert_eq!(tried, vec![9000, 9001, 9002, 9003]);
    }

    #[test]
    fn test_socket_create_failure_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = acquire_with(TransportKind::Tcp, 9000, 10, |_| {
            calls += 1;
            Err(BindAttemptError::Create(io::Error::from(
                io::ErrorKind::PermissionDenied,
            )))
        });

        assert_eq!(calls, 1);
        assert!(matches!(
            result,
            Err(ServerError::SocketCreateFailed { transport: "tcp", .. })
        ));
    }

    #[test]
    fn test_retry_stops_at_end_of_port_range() {
        let mut tried = Vec::new();
        let result: Result<(), _> = acquire_with(TransportKind::Tcp, 65533, 10, |port| {
            tried.push(port);
            Err(in_use())
        });

        assert_eq!(tried, vec![65533, 65534, 65535]);
        assert!(matches!(
            result,
            Err(ServerError::PortExhausted { last_port: 65535, attempts: 3, .. })
        ));
    }

    #[test]
    fn test_tcp_acquire_skips_occupied_port() {
        let blocker = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy_port = blocker.local_addr().unwrap().port();

        let config = ServerConfig {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            port: busy_port,
            ..Default::default()
        };
        let endpoint = acquire(&config).unwrap();

        assert!(endpoint.port() > busy_port);
        assert!(endpoint.port() < busy_port + DEFAULT_MAX_BIND_ATTEMPTS as u16);
        assert_eq!(endpoint.kind(), TransportKind::Tcp);
    }

    #[test]
    fn test_tcp_acquire_reports_occupied_port() {
        let blocker = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy_port = blocker.local_addr().unwrap().port();

        let config = ServerConfig {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            port: busy_port,
            max_bind_attempts: 1,
            ..Default::default()
        };
        assert!(matches!(
            acquire(&config),
            Err(ServerError::PortExhausted { first_port, last_port, attempts: 1, .. })
                if first_port == busy_port && last_port == busy_port
        ));
    }

    #[test]
    fn test_udp_acquire_on_ephemeral_port() {
        let config = ServerConfig {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            port: 0,
            transport: TransportKind::Udp,
            ..Default::default()
        };
        let endpoint = acquire(&config).unwrap();

        assert_eq!(endpoint.kind(), TransportKind::Udp);
        assert_ne!(endpoint.port(), 0);
        assert_eq!(endpoint.local_addr().unwrap().port(), endpoint.port());

        // The port is really taken now.
        assert!(UdpSocket::bind((Ipv4Addr::LOCALHOST, endpoint.port())).is_err());
    }
}
