//! Per-connection context assembly.
//!
//! A [`NetworkContext`] is what a registry slot holds: the client's
//! identifier, slot state, and its subsystem set.

use super::subsystems::{
    ConnectionManager, EventPipeline, GhostManager, StreamManager, SubsystemFactory,
};
use super::{ClientId, SlotState};
use crate::endpoint::TransportHandle;
use crate::error::{ServerError, SubsystemError};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

/// Everything the server keeps about one admitted client.
pub struct NetworkContext {
    client_id: ClientId,
    peer_addr: SocketAddr,
    connected_at: SystemTime,
    state: SlotState,
    connection_manager: Box<dyn ConnectionManager>,
    stream_manager: Box<dyn StreamManager>,
    event_manager: Arc<dyn EventPipeline>,
    ghost_manager: Box<dyn GhostManager>,
}

impl NetworkContext {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SlotState::Connected
    }

    pub fn connection_manager(&self) -> &dyn ConnectionManager {
        self.connection_manager.as_ref()
    }

    pub fn stream_manager(&self) -> &dyn StreamManager {
        self.stream_manager.as_ref()
    }

    pub fn event_manager(&self) -> &Arc<dyn EventPipeline> {
        &self.event_manager
    }

    pub fn ghost_manager(&self) -> &dyn GhostManager {
        self.ghost_manager.as_ref()
    }

    /// Marks the slot dead and takes its transport out. The identifier stays
    /// reserved; dropping the returned handle closes the socket.
    pub(crate) fn mark_disconnected(&mut self) -> Option<TransportHandle> {
        self.state = SlotState::Disconnected;
        self.connection_manager.disconnect()
    }
}

impl fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkContext")
            .field("client_id", &self.client_id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("connected", &self.connection_manager.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builds the subsystem set for a newly admitted transport.
///
/// Subsystems are created and initialized in a fixed order: connection
/// manager, stream manager, event manager, ghost manager. The live transport
/// is handed to the connection manager last, together with the `peer`
/// address admission observed, so assembly never touches the socket. Any
/// failure is a configuration error and is reported as
/// [`ServerError::ContextAssembly`]; the transport is dropped with the
/// partially built context.
pub fn assemble(
    factory: &dyn SubsystemFactory,
    transport: TransportHandle,
    peer: SocketAddr,
    client_id: ClientId,
) -> Result<NetworkContext, ServerError> {
    let fail = |source: SubsystemError| ServerError::ContextAssembly { client_id, source };

    let mut connection_manager = factory.connection_manager();
    connection_manager.initialize(client_id).map_err(fail)?;

    let mut stream_manager = factory.stream_manager();
    stream_manager.initialize(client_id).map_err(fail)?;

    let mut event_manager = factory.event_manager();
    event_manager.initialize(client_id).map_err(fail)?;

    let mut ghost_manager = factory.ghost_manager();
    ghost_manager.initialize(client_id).map_err(fail)?;

    connection_manager
        .initialize_connected(transport, peer)
        .map_err(fail)?;

    Ok(NetworkContext {
        client_id,
        peer_addr: peer,
        connected_at: SystemTime::now(),
        state: SlotState::Connected,
        connection_manager,
        stream_manager,
        event_manager: Arc::from(event_manager),
        ghost_manager,
    })
}
