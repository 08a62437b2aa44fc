//! Shared shutdown state for the tick loop and its companion tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared shutdown flags, cloned into every task that must stop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    /// No further ticks should run
    shutdown_initiated: Arc<AtomicBool>,
    /// The tick loop has exited
    shutdown_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Stops admission: the tick loop exits on its next tick.
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new clients will be admitted");
        }
    }

    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Tick loop stopped - ready for final cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flags() {
        let state = ShutdownState::new();
        let observer = state.clone();
        assert!(!observer.is_shutdown_initiated());

        state.initiate_shutdown();
        state.initiate_shutdown();
        assert!(observer.is_shutdown_initiated());
        assert!(!observer.is_shutdown_complete());

        state.complete_shutdown();
        assert!(observer.is_shutdown_complete());
    }
}
