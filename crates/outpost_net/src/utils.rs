//! Factory functions for creating server instances.

use crate::{config::ServerConfig, server::NetworkServer};

/// Creates a new network server with default configuration.
///
/// The server listens for TCP clients starting at port 9000 once
/// `init_network` is called.
///
/// # Example
///
/// ```rust,no_run
/// use outpost_net::create_server;
///
/// let mut server = create_server();
/// let port = server.init_network().expect("no free port");
/// println!("listening on {port}");
/// ```
pub fn create_server() -> NetworkServer {
    NetworkServer::new(ServerConfig::default())
}

/// Creates a new network server with custom configuration.
///
/// # Arguments
///
/// * `config` - A `ServerConfig` instance with desired settings
///
/// # Example
///
/// ```rust
/// use outpost_net::{create_server_with_config, ServerConfig, TransportKind};
///
/// let config = ServerConfig {
///     transport: TransportKind::Udp,
///     max_connections: 8,
///     ..Default::default()
/// };
///
/// let server = create_server_with_config(config);
/// assert_eq!(server.transport_kind(), TransportKind::Udp);
/// ```
pub fn create_server_with_config(config: ServerConfig) -> NetworkServer {
    NetworkServer::new(config)
}
