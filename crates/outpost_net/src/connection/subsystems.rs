//! Per-connection subsystem contracts and their default implementations.
//!
//! Every admitted client gets its own connection manager, stream manager,
//! event manager and ghost (replication) manager. The server only depends
//! on the traits below; the protocol stack behind them lives elsewhere. The
//! `Default*`/`Basic*` types are bookkeeping stand-ins so the server runs on
//! its own and admission side effects can be observed.

use super::ClientId;
use crate::endpoint::TransportHandle;
use crate::error::SubsystemError;
use crate::messaging::{EventTarget, NetEvent, ScheduledEvent};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Behaviour shared by every per-connection subsystem.
pub trait Subsystem: Send + Sync {
    /// Name used in errors and diagnostics.
    fn name(&self) -> &'static str;

    /// Binds the subsystem to its client. Called once, before the slot is
    /// published.
    fn initialize(&mut self, client_id: ClientId) -> Result<(), SubsystemError>;

    /// Diagnostic lines describing current state.
    fn diagnostics(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Low-level send/receive bookkeeping for one client socket.
pub trait ConnectionManager: Subsystem {
    /// Takes ownership of the live transport and marks itself connected.
    /// `peer` is the address admission observed; the socket is not queried.
    fn initialize_connected(
        &mut self,
        transport: TransportHandle,
        peer: SocketAddr,
    ) -> Result<(), SubsystemError>;

    fn is_connected(&self) -> bool;

    fn transport(&self) -> Option<&TransportHandle>;

    /// Hands back the transport so the caller decides where it is closed.
    /// Further calls return `None`.
    fn disconnect(&mut self) -> Option<TransportHandle>;
}

/// Reliable stream multiplexing for one client.
pub trait StreamManager: Subsystem {
    fn open_streams(&self) -> usize;
}

/// The event pipeline other subsystems address a client through.
pub trait EventPipeline: Subsystem {
    /// Queues `event` for delivery to `target` on this client.
    fn schedule_event(&self, event: NetEvent, target: EventTarget, immediate: bool);

    /// Removes and returns events waiting for the stream layer.
    fn drain_pending(&self) -> Vec<ScheduledEvent>;
}

/// Replicated-object synchronization for one client.
pub trait GhostManager: Subsystem {
    fn ghost_count(&self) -> usize;
}

/// Builds the subsystem set for each new connection.
pub trait SubsystemFactory: Send + Sync {
    fn connection_manager(&self) -> Box<dyn ConnectionManager>;
    fn stream_manager(&self) -> Box<dyn StreamManager>;
    fn event_manager(&self) -> Box<dyn EventPipeline>;
    fn ghost_manager(&self) -> Box<dyn GhostManager>;
}

/// Factory producing the bookkeeping implementations in this module.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSubsystems;

impl SubsystemFactory for DefaultSubsystems {
    fn connection_manager(&self) -> Box<dyn ConnectionManager> {
        Box::new(SocketConnectionManager::default())
    }

    fn stream_manager(&self) -> Box<dyn StreamManager> {
        Box::new(BasicStreamManager::default())
    }

    fn event_manager(&self) -> Box<dyn EventPipeline> {
        Box::new(QueuedEventManager::default())
    }

    fn ghost_manager(&self) -> Box<dyn GhostManager> {
        Box::new(BasicGhostManager::default())
    }
}

/// Holds the client's transport handle and peer address.
#[derive(Debug, Default)]
pub struct SocketConnectionManager {
    client_id: Option<ClientId>,
    transport: Option<TransportHandle>,
    peer_addr: Option<SocketAddr>,
}

impl Subsystem for SocketConnectionManager {
    fn name(&self) -> &'static str {
        "connection_manager"
    }

    fn initialize(&mut self, client_id: ClientId) -> Result<(), SubsystemError> {
        self.client_id = Some(client_id);
        Ok(())
    }

    fn diagnostics(&self) -> Vec<String> {
        let line = match (&self.transport, self.peer_addr) {
            (Some(transport), Some(peer)) => format!("{} peer {}", transport.kind(), peer),
            (Some(transport), None) => format!("{} peer unknown", transport.kind()),
            (None, _) => "disconnected".to_string(),
        };
        vec![line]
    }
}

impl ConnectionManager for SocketConnectionManager {
    fn initialize_connected(
        &mut self,
        transport: TransportHandle,
        peer: SocketAddr,
    ) -> Result<(), SubsystemError> {
        if self.client_id.is_none() {
            return Err(SubsystemError::new(
                self.name(),
                "initialize_connected called before initialize",
            ));
        }
        if self.transport.is_some() {
            return Err(SubsystemError::new(self.name(), "already connected"));
        }
        self.peer_addr = Some(peer);
        self.transport = Some(transport);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&self) -> Option<&TransportHandle> {
        self.transport.as_ref()
    }

    fn disconnect(&mut self) -> Option<TransportHandle> {
        self.transport.take()
    }
}

/// Counts the streams opened for a client; starts with one reliable stream.
#[derive(Debug, Default)]
pub struct BasicStreamManager {
    open_streams: usize,
}

impl Subsystem for BasicStreamManager {
    fn name(&self) -> &'static str {
        "stream_manager"
    }

    fn initialize(&mut self, _client_id: ClientId) -> Result<(), SubsystemError> {
        self.open_streams = 1;
        Ok(())
    }

    fn diagnostics(&self) -> Vec<String> {
        vec![format!("streams: {}", self.open_streams)]
    }
}

impl StreamManager for BasicStreamManager {
    fn open_streams(&self) -> usize {
        self.open_streams
    }
}

/// Pending events kept per client before old ones are dropped.
pub const MAX_PENDING_EVENTS: usize = 1024;

/// Queues scheduled events until the stream layer drains them.
#[derive(Debug, Default)]
pub struct QueuedEventManager {
    client_id: Option<ClientId>,
    pending: Mutex<VecDeque<ScheduledEvent>>,
    scheduled_total: AtomicU64,
}

impl QueuedEventManager {
    fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<ScheduledEvent>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Subsystem for QueuedEventManager {
    fn name(&self) -> &'static str {
        "event_manager"
    }

    fn initialize(&mut self, client_id: ClientId) -> Result<(), SubsystemError> {
        self.client_id = Some(client_id);
        Ok(())
    }

    fn diagnostics(&self) -> Vec<String> {
        let pending = self.pending();
        let mut lines = vec![format!(
            "events: {} pending, {} scheduled",
            pending.len(),
            self.scheduled_total.load(Ordering::Relaxed)
        )];
        lines.extend(
            pending
                .iter()
                .map(|scheduled| format!("  -> {} ({:?})", scheduled.event.name(), scheduled.target)),
        );
        lines
    }
}

impl EventPipeline for QueuedEventManager {
    fn schedule_event(&self, event: NetEvent, target: EventTarget, immediate: bool) {
        let mut pending = self.pending();
        if pending.len() >= MAX_PENDING_EVENTS {
            if let Some(dropped) = pending.pop_front() {
                warn!(
                    "Event queue for client {:?} full, dropping '{}'",
                    self.client_id,
                    dropped.event.name()
                );
            }
        }
        let scheduled = ScheduledEvent {
            event,
            target,
            immediate,
        };
        // Immediate events jump ahead of anything not yet flagged immediate.
        if immediate {
            let position = pending
                .iter()
                .position(|queued| !queued.immediate)
                .unwrap_or(pending.len());
            pending.insert(position, scheduled);
        } else {
            pending.push_back(scheduled);
        }
        self.scheduled_total.fetch_add(1, Ordering::Relaxed);
    }

    fn drain_pending(&self) -> Vec<ScheduledEvent> {
        self.pending().drain(..).collect()
    }
}

/// Tracks how many objects are replicated to a client.
#[derive(Debug, Default)]
pub struct BasicGhostManager {
    ghosts: usize,
}

impl Subsystem for BasicGhostManager {
    fn name(&self) -> &'static str {
        "ghost_manager"
    }

    fn initialize(&mut self, _client_id: ClientId) -> Result<(), SubsystemError> {
        self.ghosts = 0;
        Ok(())
    }

    fn diagnostics(&self) -> Vec<String> {
        vec![format!("ghosts: {}", self.ghosts)]
    }
}

impl GhostManager for BasicGhostManager {
    fn ghost_count(&self) -> usize {
        self.ghosts
    }
}
