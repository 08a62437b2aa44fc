//! Core network server implementation.
//!
//! This module contains the `NetworkServer` struct: it owns the server
//! endpoint and the connection registry, admits at most one client per tick,
//! and exposes the broadcast and diagnostics primitives the rest of the game
//! uses to address connected clients.

use crate::{
    config::{ServerConfig, TransportKind},
    connection::{
        assemble, AppendError, ClientId, ConnectionRegistry, DefaultSubsystems, SlotState,
        SubsystemFactory,
    },
    endpoint,
    error::{AdmissionError, ServerError},
    messaging::{EventTarget, NetEvent},
    server::admission::{Acceptor, Admitted},
    server::diagnostics::{ConnectionReport, DiagnosticsReport},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle of the server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// `init_network` has not succeeded yet
    Uninitialized,
    /// The endpoint is bound and admissions are polled every tick
    Listening,
}

/// The server-side connection acceptor and client registry.
///
/// # Architecture
///
/// * **Endpoint**: one non-blocking listening (TCP) or rendezvous (UDP) socket
/// * **Admission**: `update` polls the endpoint once per tick and never blocks
/// * **Registry**: append-only, mutex-guarded list of per-client contexts
/// * **Broadcast**: schedules events onto every client's event pipeline
///
/// `NetworkServer` is `Send + Sync`; after `init_network` it is usually
/// shared in an `Arc` between the tick loop and diagnostics/game threads.
pub struct NetworkServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Registry of admitted clients
    registry: Arc<ConnectionRegistry>,

    /// Builds the subsystem set for each new connection
    subsystems: Arc<dyn SubsystemFactory>,

    /// Admission path, present once the endpoint is bound
    acceptor: Option<Acceptor>,

    /// Port the endpoint ended up bound to
    server_port: Option<u16>,
}

impl NetworkServer {
    /// Creates a server using the default per-connection subsystems.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_subsystems(config, Arc::new(DefaultSubsystems))
    }

    /// Creates a server whose connections are assembled by `subsystems`.
    pub fn with_subsystems(config: ServerConfig, subsystems: Arc<dyn SubsystemFactory>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        Self {
            config,
            registry,
            subsystems,
            acceptor: None,
            server_port: None,
        }
    }

    /// Binds the endpoint for the configured transport.
    ///
    /// Walks upward from the configured port until a bind succeeds or the
    /// attempt ceiling is hit. Any error here is fatal: the server must not
    /// start serving.
    ///
    /// # Returns
    ///
    /// The port actually bound.
    pub fn init_network(&mut self) -> Result<u16, ServerError> {
        if let Some(port) = self.server_port {
            return Err(ServerError::AlreadyInitialized(port));
        }
        self.config.validate()?;

        info!(
            "🚀 Opening {} server starting at port {}",
            self.config.transport, self.config.port
        );
        let endpoint = endpoint::acquire(&self.config).map_err(|e| {
            error!("❌ Could not create server: {}", e);
            e
        })?;

        let port = endpoint.port();
        self.acceptor = Some(Acceptor::new(endpoint, &self.config));
        self.server_port = Some(port);
        info!("✅ Listening for {} clients on port {}", self.config.transport, port);
        Ok(port)
    }

    /// Runs one admission attempt. Called once per server tick.
    ///
    /// Per-tick failures (malformed handshakes, failed handshake steps, a
    /// full registry) are logged and reported as `Ok(None)`; they never leave
    /// a partial slot behind. Only a context assembly failure is returned as
    /// an error, since it means the subsystem configuration is broken.
    ///
    /// # Returns
    ///
    /// `Ok(Some(client_id))` when a client was admitted on this tick.
    pub fn update(&self) -> Result<Option<ClientId>, ServerError> {
        let acceptor = self.acceptor.as_ref().ok_or(ServerError::NotInitialized)?;

        let admitted = match acceptor.poll(&self.registry) {
            Ok(Some(admitted)) => admitted,
            Ok(None) => return Ok(None),
            Err(e) => {
                log_admission_failure(&e);
                return Ok(None);
            }
        };

        self.register(admitted)
    }

    /// Places an admitted transport in the registry and notifies the client.
    fn register(&self, admitted: Admitted) -> Result<Option<ClientId>, ServerError> {
        let Admitted { transport, peer } = admitted;
        let kind = transport.kind();
        let subsystems = self.subsystems.as_ref();

        let client_id = match self
            .registry
            .append_with(|client_id| assemble(subsystems, transport, peer, client_id))
        {
            Ok(client_id) => client_id,
            Err(AppendError::Full { capacity }) => {
                warn!("⚠️ Registry full ({} connections), dropping {}", capacity, peer);
                return Ok(None);
            }
            Err(AppendError::Assembly(e)) => {
                error!("❌ {}", e);
                return Err(e);
            }
        };

        info!("🔗 Client {} admitted from {} over {}", client_id, peer, kind);
        self.schedule_admission_events(client_id);
        Ok(Some(client_id))
    }

    /// Schedules the connection acknowledgement and the level sync onto a
    /// newly admitted client's pipeline, in that order.
    fn schedule_admission_events(&self, client_id: ClientId) {
        let Some(pipeline) = self.registry.event_pipeline(client_id) else {
            return;
        };

        let level = &self.config.initial_level;
        pipeline.schedule_event(
            NetEvent::ConnectionAck { client_id },
            EventTarget::GameObjectManager,
            true,
        );
        pipeline.schedule_event(
            NetEvent::SyncLevel {
                level_name: level.name.clone(),
                level_file: level.file.clone(),
            },
            EventTarget::GameObjectManager,
            true,
        );
    }

    /// Schedules `event` on every connected client except `except`.
    ///
    /// The whole pass runs under the registry lock, so no client can be
    /// admitted halfway through. Disconnected slots are skipped.
    ///
    /// # Returns
    ///
    /// The number of clients the event was scheduled for.
    pub fn broadcast_except(
        &self,
        event: &NetEvent,
        target: EventTarget,
        except: Option<ClientId>,
    ) -> usize {
        let delivered = self.registry.with_slots(|slots| {
            let mut delivered = 0;
            for context in slots {
                if !context.is_connected() || Some(context.client_id()) == except {
                    continue;
                }
                context
                    .event_manager()
                    .schedule_event(event.clone(), target, true);
                delivered += 1;
            }
            delivered
        });

        debug!(
            "📡 Broadcast '{}' to {} clients (except {:?})",
            event.name(),
            delivered,
            except
        );
        delivered
    }

    /// Schedules `event` on every connected client.
    pub fn broadcast(&self, event: &NetEvent, target: EventTarget) -> usize {
        self.broadcast_except(event, target, None)
    }

    /// Schedules `event` on a single client.
    ///
    /// Returns `false` if the client does not exist or is disconnected.
    pub fn send_to(&self, client_id: ClientId, event: NetEvent, target: EventTarget) -> bool {
        match self.registry.get(client_id) {
            Some(slot) if slot.state == SlotState::Connected => {
                slot.event_pipeline.schedule_event(event, target, true);
                true
            }
            _ => {
                debug!("Client {} not connected, '{}' not sent", client_id, event.name());
                false
            }
        }
    }

    /// Marks a client disconnected; its identifier stays reserved.
    pub fn disconnect(&self, client_id: ClientId) -> bool {
        let disconnected = self.registry.mark_disconnected(client_id);
        if disconnected {
            info!("❌ Client {} disconnected", client_id);
        }
        disconnected
    }

    /// Builds a diagnostic report of the server and every slot.
    ///
    /// Purely observational; safe to call from any thread.
    pub fn render_diagnostics(&self) -> DiagnosticsReport {
        let connections = self
            .registry
            .with_slots(|slots| slots.iter().map(ConnectionReport::from_context).collect());
        DiagnosticsReport {
            server_port: self.server_port.unwrap_or(0),
            connections,
        }
    }

    pub fn state(&self) -> ServerState {
        if self.acceptor.is_some() {
            ServerState::Listening
        } else {
            ServerState::Uninitialized
        }
    }

    pub fn server_port(&self) -> Option<u16> {
        self.server_port
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.config.transport
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The registry, for subsystems that address clients directly.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

fn log_admission_failure(error: &AdmissionError) {
    match error {
        AdmissionError::Malformed { .. } => warn!("⚠️ Dropping rendezvous datagram: {}", error),
        AdmissionError::HandshakeStepFailed { .. } => warn!("⚠️ Admission aborted: {}", error),
        AdmissionError::RegistryFull { .. } => warn!("⚠️ {}", error),
        AdmissionError::Poll(_) => debug!("{}", error),
    }
}
