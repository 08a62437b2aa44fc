//! Server-owned transport sockets.
//!
//! The [`ServerEndpoint`] is the single listening (TCP) or rendezvous (UDP)
//! socket a server owns. [`TransportHandle`] is the per-client socket that an
//! admission produces and a registry slot then owns.

pub mod acquire;

pub use acquire::{acquire, acquire_with, BindAttemptError};

use crate::config::TransportKind;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};

/// The raw socket behind a [`ServerEndpoint`].
#[derive(Debug)]
pub enum EndpointSocket {
    /// Non-blocking listening socket
    Stream(TcpListener),
    /// Non-blocking rendezvous socket
    Datagram(UdpSocket),
}

/// The listening/rendezvous socket a server owns.
///
/// Created once by the acquirer and closed when dropped.
#[derive(Debug)]
pub struct ServerEndpoint {
    socket: EndpointSocket,
    port: u16,
}

impl ServerEndpoint {
    pub(crate) fn new(socket: EndpointSocket, port: u16) -> Self {
        Self { socket, port }
    }

    /// The port the socket is actually bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> TransportKind {
        match self.socket {
            EndpointSocket::Stream(_) => TransportKind::Tcp,
            EndpointSocket::Datagram(_) => TransportKind::Udp,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            EndpointSocket::Stream(listener) => listener.local_addr(),
            EndpointSocket::Datagram(socket) => socket.local_addr(),
        }
    }

    /// Consumes the endpoint, handing out the socket to an admission path.
    pub(crate) fn into_socket(self) -> EndpointSocket {
        self.socket
    }
}

/// A per-client socket produced by admission.
#[derive(Debug)]
pub enum TransportHandle {
    /// Stream accepted from the listening socket
    Stream(TcpStream),
    /// Punch-through socket connected to a single peer
    Datagram(UdpSocket),
}

impl TransportHandle {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportHandle::Stream(_) => TransportKind::Tcp,
            TransportHandle::Datagram(_) => TransportKind::Udp,
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            TransportHandle::Stream(stream) => stream.peer_addr(),
            TransportHandle::Datagram(socket) => socket.peer_addr(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            TransportHandle::Stream(stream) => stream.local_addr(),
            TransportHandle::Datagram(socket) => socket.local_addr(),
        }
    }
}
