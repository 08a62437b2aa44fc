//! Event payloads the server hands to per-connection event pipelines.
//!
//! The core never serializes these itself; it only schedules them. The
//! serde derives are for the event pipeline collaborator, which owns the
//! wire encoding.

use crate::connection::ClientId;
use serde::{Deserialize, Serialize};

/// An event scheduled onto a client's event pipeline.
///
/// # Examples
///
/// Connection acknowledgement as the default pipeline encodes it:
/// ```json
/// { "type": "connection_ack", "client_id": 0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetEvent {
    /// Tells a newly admitted client which identifier it was assigned
    ConnectionAck { client_id: ClientId },

    /// Tells a client which level to load
    SyncLevel { level_name: String, level_file: String },

    /// Any other game event routed through the server
    Custom {
        name: String,
        data: serde_json::Value,
    },
}

impl NetEvent {
    /// Short name used in logs and diagnostics.
    pub fn name(&self) -> &str {
        match self {
            NetEvent::ConnectionAck { .. } => "connection_ack",
            NetEvent::SyncLevel { .. } => "sync_level",
            NetEvent::Custom { name, .. } => name,
        }
    }
}

/// Who an event is addressed to on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTarget {
    /// The client's game object manager
    GameObjectManager,
    /// A specific networked object
    Object(u64),
}

/// An event as recorded by an event pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub event: NetEvent,
    pub target: EventTarget,
    pub immediate: bool,
}
