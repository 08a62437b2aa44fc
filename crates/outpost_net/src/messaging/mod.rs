//! Message formats the server produces or consumes.
//!
//! [`types`] holds the event payloads scheduled onto client pipelines;
//! [`rendezvous`] holds the plain-text handshake used by the UDP transport.

pub mod rendezvous;
pub mod types;

pub use rendezvous::{response_message, RendezvousRequest};
pub use types::{EventTarget, NetEvent, ScheduledEvent};
