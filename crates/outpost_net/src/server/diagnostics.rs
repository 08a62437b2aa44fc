//! Per-connection diagnostic reports.

use crate::connection::{ClientId, NetworkContext, SlotState};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

/// Diagnostic state of one registry slot.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub client_id: ClientId,
    pub connected: bool,
    pub peer_addr: SocketAddr,
    /// Lines reported by the slot's subsystems, event pipeline included
    pub details: Vec<String>,
}

impl ConnectionReport {
    pub(crate) fn from_context(context: &NetworkContext) -> Self {
        let mut details = context.connection_manager().diagnostics();
        details.extend(context.stream_manager().diagnostics());
        details.extend(context.event_manager().diagnostics());
        details.extend(context.ghost_manager().diagnostics());
        Self {
            client_id: context.client_id(),
            connected: context.state() == SlotState::Connected,
            peer_addr: context.peer_addr(),
            details,
        }
    }
}

/// Snapshot of the server and every registered connection.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub server_port: u16,
    pub connections: Vec<ConnectionReport>,
}

impl DiagnosticsReport {
    /// Renders the report as text lines: one server header, then one
    /// `Connection[i]:` line per slot followed by its indented details.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(1 + self.connections.len() * 4);
        lines.push(format!(
            "Server: Port {} {} Connections",
            self.server_port,
            self.connections.len()
        ));
        for connection in &self.connections {
            if connection.connected {
                lines.push(format!("Connection[{}]:", connection.client_id));
            } else {
                lines.push(format!("Connection[{}]: disconnected", connection.client_id));
            }
            lines.extend(connection.details.iter().map(|detail| format!("  {detail}")));
        }
        lines
    }
}

impl fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            f.write_str(line)?;
        }
        Ok(())
    }
}
