//! Per-tick admission of new clients.
//!
//! Each transport kind has its own acceptor; both perform at most one
//! non-blocking poll per call and never register anything themselves. A
//! successful poll yields an [`Admitted`] transport for the server to place
//! in the registry.

use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::endpoint::{EndpointSocket, ServerEndpoint, TransportHandle};
use crate::error::{AdmissionError, HandshakeStep};
use crate::messaging::rendezvous::{response_message, RendezvousRequest, MAX_REQUEST_LEN};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::time::Duration;
use tracing::{debug, info};

/// A transport that completed admission and is ready for a registry slot.
#[derive(Debug)]
pub struct Admitted {
    pub transport: TransportHandle,
    pub peer: SocketAddr,
}

/// The admission path selected at startup.
#[derive(Debug)]
pub enum Acceptor {
    Stream(StreamAcceptor),
    Datagram(DatagramAcceptor),
}

impl Acceptor {
    pub fn new(endpoint: ServerEndpoint, config: &ServerConfig) -> Self {
        match endpoint.into_socket() {
            EndpointSocket::Stream(listener) => Acceptor::Stream(StreamAcceptor { listener }),
            EndpointSocket::Datagram(socket) => Acceptor::Datagram(DatagramAcceptor {
                socket,
                connect_timeout: config.connect_timeout(),
                send_timeout: config.send_timeout(),
            }),
        }
    }

    /// One non-blocking admission attempt.
    ///
    /// `Ok(None)` means nothing was pending, which is the steady state.
    pub fn poll(&self, registry: &ConnectionRegistry) -> Result<Option<Admitted>, AdmissionError> {
        match self {
            Acceptor::Stream(acceptor) => acceptor.poll(registry),
            Acceptor::Datagram(acceptor) => acceptor.poll(registry),
        }
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Accepts TCP connections from the listening socket.
#[derive(Debug)]
pub struct StreamAcceptor {
    listener: TcpListener,
}

impl StreamAcceptor {
    fn poll(&self, registry: &ConnectionRegistry) -> Result<Option<Admitted>, AdmissionError> {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if is_idle(&e) => return Ok(None),
            Err(e) => return Err(AdmissionError::Poll(e)),
        };

        if registry.is_full() {
            // Dropping the stream closes it.
            return Err(AdmissionError::RegistryFull {
                capacity: registry.capacity(),
                peer,
            });
        }

        stream.set_nonblocking(true).map_err(AdmissionError::Poll)?;
        debug!("Accepted TCP connection from {}", peer);
        Ok(Some(Admitted {
            transport: TransportHandle::Stream(stream),
            peer,
        }))
    }
}

/// Runs the rendezvous handshake on the UDP rendezvous socket.
#[derive(Debug)]
pub struct DatagramAcceptor {
    socket: UdpSocket,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl DatagramAcceptor {
    fn poll(&self, registry: &ConnectionRegistry) -> Result<Option<Admitted>, AdmissionError> {
        let mut buf = [0u8; MAX_REQUEST_LEN];
        let (len, sender) = match self.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if is_idle(&e) => return Ok(None),
            Err(e) => return Err(AdmissionError::Poll(e)),
        };

        let request = RendezvousRequest::parse(&buf[..len])
            .map_err(|source| AdmissionError::Malformed { from: sender, source })?;
        info!(
            "📨 Rendezvous request from {} for {}",
            sender,
            request.socket_addr()
        );

        if registry.is_full() {
            return Err(AdmissionError::RegistryFull {
                capacity: registry.capacity(),
                peer: sender,
            });
        }

        let (transport, local_port) = self.punch_through(&request, sender)?;
        info!("📤 Sent client {} new port: {}", sender, local_port);
        Ok(Some(Admitted {
            transport,
            peer: sender,
        }))
    }

    /// Creates the client's dedicated socket: bound to the address the
    /// client declared, connected to the address it was actually seen from.
    ///
    /// Any error drops the socket before returning.
    fn punch_through(
        &self,
        request: &RendezvousRequest,
        sender: SocketAddr,
    ) -> Result<(TransportHandle, u16), AdmissionError> {
        let bind_addr = request.socket_addr();
        let failed = |step: HandshakeStep, addr: SocketAddr| {
            move |source: io::Error| AdmissionError::HandshakeStepFailed { step, addr, source }
        };

        let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(failed(HandshakeStep::Create, bind_addr))?;
        socket
            .bind(&bind_addr.into())
            .map_err(failed(HandshakeStep::Bind, bind_addr))?;

        let local_port = socket
            .local_addr()
            .and_then(|local| {
                local
                    .as_socket()
                    .map(|local| local.port())
                    .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "not an inet address"))
            })
            .map_err(failed(HandshakeStep::LocalAddr, bind_addr))?;

        socket
            .connect_timeout(&sender.into(), self.connect_timeout)
            .map_err(failed(HandshakeStep::Connect, sender))?;

        let response = response_message(local_port);
        socket
            .set_write_timeout(Some(self.send_timeout))
            .and_then(|()| socket.send(response.as_bytes()))
            .and_then(|sent| {
                debug!("{} bytes sent to {}", sent, sender);
                socket.set_nonblocking(true)
            })
            .map_err(failed(HandshakeStep::Send, sender))?;

        Ok((TransportHandle::Datagram(socket.into()), local_port))
    }
}
