//! Append-only registry of admitted clients.
//!
//! One mutex guards both growth and iteration. Nothing done under the lock
//! touches a socket: admission I/O happens before a slot is appended, and
//! iteration only schedules onto already-known event pipelines.

use super::context::NetworkContext;
use super::subsystems::EventPipeline;
use super::{ClientId, SlotState};
use crate::error::ServerError;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Why a slot could not be appended.
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error("registry full ({capacity} slots)")]
    Full { capacity: usize },

    #[error(transparent)]
    Assembly(#[from] ServerError),
}

/// A copy of a slot's public state, usable after the lock is released.
#[derive(Clone)]
pub struct SlotView {
    pub client_id: ClientId,
    pub peer_addr: SocketAddr,
    pub connected_at: SystemTime,
    pub state: SlotState,
    pub event_pipeline: Arc<dyn EventPipeline>,
}

impl fmt::Debug for SlotView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotView")
            .field("client_id", &self.client_id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl From<&NetworkContext> for SlotView {
    fn from(context: &NetworkContext) -> Self {
        Self {
            client_id: context.client_id(),
            peer_addr: context.peer_addr(),
            connected_at: context.connected_at(),
            state: context.state(),
            event_pipeline: context.event_manager().clone(),
        }
    }
}

/// Thread-safe, ordered collection of per-client contexts.
///
/// # Invariants
///
/// * The slot at index `i` has client identifier `i`.
/// * Slots are never removed, moved or reused; a dead client is marked
///   [`SlotState::Disconnected`] in place.
#[derive(Debug)]
pub struct ConnectionRegistry {
    slots: Mutex<Vec<NetworkContext>>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            capacity,
        }
    }

    // Slots are only ever pushed or flagged, so a poisoned lock still guards
    // consistent data.
    fn lock(&self) -> MutexGuard<'_, Vec<NetworkContext>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a new slot.
    ///
    /// `assemble` receives the identifier the slot will get (the current
    /// length) and runs inside the critical section, so no other append can
    /// claim the same identifier. It must not perform socket I/O.
    pub fn append_with<F>(&self, assemble: F) -> Result<ClientId, AppendError>
    where
        F: FnOnce(ClientId) -> Result<NetworkContext, ServerError>,
    {
        let mut slots = self.lock();
        if slots.len() >= self.capacity {
            return Err(AppendError::Full {
                capacity: self.capacity,
            });
        }
        let client_id = slots.len();
        let context = assemble(client_id)?;
        debug_assert_eq!(context.client_id(), client_id);
        slots.push(context);
        Ok(client_id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<SlotView> {
        self.lock().get(client_id).map(SlotView::from)
    }

    /// The event pipeline of `client_id`, if such a client was admitted.
    pub fn event_pipeline(&self, client_id: ClientId) -> Option<Arc<dyn EventPipeline>> {
        self.lock()
            .get(client_id)
            .map(|context| context.event_manager().clone())
    }

    /// Ordered copy of every slot.
    pub fn snapshot(&self) -> Vec<SlotView> {
        self.lock().iter().map(SlotView::from).collect()
    }

    /// Runs `f` over all slots while holding the lock.
    pub fn with_slots<R>(&self, f: impl FnOnce(&[NetworkContext]) -> R) -> R {
        f(&self.lock())
    }

    /// Flags a client as disconnected and closes its transport.
    ///
    /// Returns `false` if no such client exists or it was already
    /// disconnected.
    pub fn mark_disconnected(&self, client_id: ClientId) -> bool {
        let transport = {
            let mut slots = self.lock();
            match slots.get_mut(client_id) {
                Some(context) if context.is_connected() => context.mark_disconnected(),
                _ => return false,
            }
        };
        // Closed here, after the guard is gone.
        drop(transport);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn connected_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|context| context.is_connected())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{assemble, DefaultSubsystems};
    use crate::endpoint::TransportHandle;
    use std::collections::HashSet;
    use std::net::{Ipv4Addr, UdpSocket};
    use std::thread;

    fn context_for(client_id: ClientId) -> Result<NetworkContext, ServerError> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, 6000));
        assemble(&DefaultSubsystems, TransportHandle::Datagram(socket), peer, client_id)
    }

    #[test]
    fn test_identifiers_are_dense_and_ordered() {
        let registry = ConnectionRegistry::new(8);
        for expected in 0..3 {
            assert_eq!(registry.len(), expected);
            assert_eq!(registry.append_with(context_for).unwrap(), expected);
        }

        let ids: Vec<ClientId> = registry.snapshot().iter().map(|slot| slot.client_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_concurrent_appends_never_share_an_identifier() {
        let registry = Arc::new(ConnectionRegistry::new(64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..4)
                        .map(|_| registry.append_with(context_for).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "identifier {id} assigned twice");
            }
        }
        assert_eq!(seen.len(), 32);
        assert_eq!(seen, (0..32).collect::<HashSet<_>>());
    }

    #[test]
    fn test_full_registry_rejects_append() {
        let registry = ConnectionRegistry::new(1);
        registry.append_with(context_for).unwrap();
        assert!(registry.is_full());
        assert!(matches!(
            registry.append_with(context_for),
            Err(AppendError::Full { capacity: 1 })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_assembly_leaves_no_slot() {
        let registry = ConnectionRegistry::new(4);
        let result = registry.append_with(|_| Err(ServerError::NotInitialized));
        assert!(matches!(result, Err(AppendError::Assembly(_))));
        assert!(registry.is_empty());

        // The identifier was not consumed.
        assert_eq!(registry.append_with(context_for).unwrap(), 0);
    }

    #[test]
    fn test_mark_disconnected_keeps_identifier() {
        let registry = ConnectionRegistry::new(4);
        registry.append_with(context_for).unwrap();
        registry.append_with(context_for).unwrap();

        assert!(registry.mark_disconnected(0));
        assert!(!registry.mark_disconnected(0));
        assert!(!registry.mark_disconnected(5));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connected_count(), 1);
        assert_eq!(registry.get(0).unwrap().state, SlotState::Disconnected);
        assert_eq!(registry.append_with(context_for).unwrap(), 2);
    }
}
