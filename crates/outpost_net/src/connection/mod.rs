//! Connection management for admitted clients.
//!
//! This module holds the registry of admitted clients, the per-connection
//! context each registry slot owns, and the subsystem contracts that context
//! is assembled from.

pub mod context;
pub mod registry;
pub mod subsystems;

pub use context::{assemble, NetworkContext};
pub use registry::{AppendError, ConnectionRegistry, SlotView};
pub use subsystems::{
    ConnectionManager, DefaultSubsystems, EventPipeline, GhostManager, StreamManager, Subsystem,
    SubsystemFactory,
};

/// Type alias for client identifiers.
///
/// A client identifier is the index of the client's registry slot: dense,
/// zero-based, assigned once in admission order and never reused.
pub type ClientId = usize;

/// Liveness of a registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Receives broadcasts
    Connected,
    /// Identifier kept, no longer addressed by broadcasts
    Disconnected,
}
