//! # Outpost Net - Tick-Driven Connection Acceptor
//!
//! Server-side connection admission and client registry for Outpost game
//! servers. The crate owns one listening endpoint, admits at most one new
//! client per server tick without ever blocking the tick, and keeps every
//! admitted client in an append-only registry that the rest of the game uses
//! to address clients and broadcast events.
//!
//! ## Transports
//!
//! * **TCP** - non-blocking `accept` on a listening socket
//! * **UDP** - a rendezvous handshake: the client sends
//!   `addr: <ip> port: <port>` to the rendezvous socket, the server creates a
//!   dedicated punch-through socket bound to that address, connects it back
//!   to the sender and replies `New connection, new port: <port>`
//!
//! ## Lifecycle
//!
//! 1. [`NetworkServer::init_network`] binds the endpoint, walking upward from
//!    the configured port when it is taken
//! 2. [`NetworkServer::update`] is called once per tick and performs one
//!    admission attempt
//! 3. Each admitted client gets a [`connection::NetworkContext`] assembled
//!    from its subsystems, and is greeted with a connection acknowledgement
//!    and a level sync on its event pipeline
//! 4. [`NetworkServer::broadcast_except`] and
//!    [`NetworkServer::render_diagnostics`] address the registry from any
//!    thread
//!
//! ## Error Handling
//!
//! Endpoint failures at startup are fatal ([`ServerError`]). Per-tick
//! admission failures ([`AdmissionError`]) are logged and never leave a
//! partial registry slot behind.
//!
//! ## Thread Safety
//!
//! The registry is guarded by a single mutex covering both growth and
//! iteration. No socket I/O happens while it is held.

pub use config::{ServerConfig, TransportKind};
pub use connection::{ClientId, ConnectionRegistry, SlotState};
pub use error::{AdmissionError, HandshakeError, ServerError};
pub use messaging::{EventTarget, NetEvent};
pub use server::{DiagnosticsReport, NetworkServer, ServerState};
pub use utils::{create_server, create_server_with_config};

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod messaging;
pub mod server;
pub mod utils;

#[cfg(test)]
mod tests;
