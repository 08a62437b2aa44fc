//! Rendezvous handshake wire format.
//!
//! Request (client → rendezvous socket), plain text:
//! ```text
//! addr: <dotted-ip> port: <decimal>
//! ```
//! Response (punch-through socket → client), plain text:
//! ```text
//! New connection, new port: <decimal>
//! ```
//! There is no version field or length prefix; the literal tokens are the
//! protocol.

use crate::error::HandshakeError;
use std::net::{IpAddr, SocketAddr};

/// Largest request datagram the server reads.
pub const MAX_REQUEST_LEN: usize = 512;

const ADDR_KEY: &str = "addr:";
const PORT_KEY: &str = "port:";
const RESPONSE_PREFIX: &str = "New connection, new port: ";

/// A parsed rendezvous request: where the client wants its punch-through
/// socket bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendezvousRequest {
    pub addr: IpAddr,
    pub port: u16,
}

impl RendezvousRequest {
    /// Parses a raw datagram.
    ///
    /// Tokens are whitespace separated. `addr:` and `port:` take the next
    /// token as their value (`addr:10.0.0.5` written as one token is
    /// accepted too). Unknown tokens are ignored and a repeated key keeps
    /// its last value.
    pub fn parse(datagram: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(datagram).map_err(|_| HandshakeError::NotUtf8)?;
        let text = text.trim_end_matches('\0');
        if text.trim().is_empty() {
            return Err(HandshakeError::Empty);
        }

        let mut addr = None;
        let mut port = None;
        let mut tokens = text.split_whitespace();
        while let Some(token) = tokens.next() {
            if let Some(inline) = token.strip_prefix(ADDR_KEY) {
                addr = Some(key_value(ADDR_KEY, inline, &mut tokens)?);
            } else if let Some(inline) = token.strip_prefix(PORT_KEY) {
                port = Some(key_value(PORT_KEY, inline, &mut tokens)?);
            }
        }

        let addr = addr.ok_or(HandshakeError::MissingKey(ADDR_KEY))?;
        let port = port.ok_or(HandshakeError::MissingKey(PORT_KEY))?;

        let addr = addr
            .parse::<IpAddr>()
            .map_err(|_| HandshakeError::InvalidAddress(addr.to_string()))?;
        let port = parse_port(port)?;

        Ok(Self { addr, port })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Encodes the request the way clients send it.
    pub fn to_message(&self) -> String {
        format!("{ADDR_KEY} {} {PORT_KEY} {}", self.addr, self.port)
    }
}

fn key_value<'a>(
    key: &'static str,
    inline: &'a str,
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<&'a str, HandshakeError> {
    if !inline.is_empty() {
        return Ok(inline);
    }
    tokens.next().ok_or(HandshakeError::MissingValue(key))
}

fn parse_port(value: &str) -> Result<u16, HandshakeError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HandshakeError::InvalidPort(value.to_string()));
    }
    value
        .parse::<u16>()
        .map_err(|_| HandshakeError::InvalidPort(value.to_string()))
}

/// Builds the response announcing the punch-through socket's port.
pub fn response_message(port: u16) -> String {
    format!("{RESPONSE_PREFIX}{port}")
}

/// Extracts the port from a response datagram.
pub fn parse_response(datagram: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(datagram).ok()?;
    text.trim_end_matches('\0')
        .trim()
        .strip_prefix(RESPONSE_PREFIX.trim_end())?
        .trim()
        .parse()
        .ok()
}
