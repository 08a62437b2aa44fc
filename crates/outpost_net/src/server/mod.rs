//! Core server implementation and per-tick admission.
//!
//! This module contains the network server structure, the transport-specific
//! admission paths, and the diagnostics it reports.

pub mod admission;
pub mod core;
pub mod diagnostics;

pub use core::{NetworkServer, ServerState};
pub use diagnostics::{ConnectionReport, DiagnosticsReport};
