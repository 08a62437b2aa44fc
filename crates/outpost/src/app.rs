//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that binds the network
//! endpoint, drives the server tick, reports diagnostics periodically and
//! shuts everything down on a termination signal.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    shutdown::ShutdownState,
    signals::{wait_for_shutdown_signal, wait_for_signal_silent},
};
use outpost_net::NetworkServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

/// How long shutdown waits for the tick loop to observe the flag.
const TICK_LOOP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the configuration and the network server for one process run.
///
/// # Architecture
///
/// * **Configuration Management**: file values with CLI overrides on top
/// * **Tick Loop**: one `update()` per tick on a tokio interval
/// * **Diagnostics**: periodic per-connection report in the log
/// * **Graceful Shutdown**: signal-triggered, coordinated via `ShutdownState`
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Network server, not yet bound
    server: NetworkServer,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Create the network server
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let server = NetworkServer::new(config.to_server_config()?);
        Ok(Self { config, server })
    }

    /// Runs the application until a shutdown signal arrives.
    ///
    /// Binding the endpoint is the only fatal step: if no port in the
    /// configured range can be bound, this returns an error before any tick
    /// runs.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Outpost server");
        self.log_configuration_summary();

        let Application { config, mut server } = self;
        let port = server.init_network()?;
        let server = Arc::new(server);
        let shutdown_state = ShutdownState::new();

        let tick_handle = spawn_tick_loop(
            server.clone(),
            config.server.tick_interval(),
            shutdown_state.clone(),
        );
        let diagnostics_handle = config
            .server
            .diagnostics_interval()
            .map(|period| spawn_diagnostics(server.clone(), period));

        info!("✅ Outpost server is now running!");
        info!(
            "🎮 Ready to accept {} clients on {}:{}",
            server.transport_kind(),
            config.server.bind_address,
            port
        );
        if let Some(period) = config.server.diagnostics_interval() {
            info!("🔍 Diagnostics every {}s", period.as_secs());
        }
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        wait_for_shutdown_signal().await?;

        // A second signal exits without waiting.
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        if let Some(handle) = diagnostics_handle {
            handle.abort();
        }
        stop_tick_loop(tick_handle, &shutdown_state, TICK_LOOP_SHUTDOWN_TIMEOUT).await;

        log_final_statistics(&server, &shutdown_state);
        info!("✅ Outpost server shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        let server = &self.config.server;
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", server.bind_address);
        info!(
            "  🔌 Transport: {} | ports {}..+{}",
            server.transport, server.port, server.max_bind_attempts
        );
        info!("  👥 Max connections: {}", server.max_connections);
        info!("  ⏱️ Tick interval: {}ms", server.tick_interval_ms);
        info!(
            "  🗺️ Initial level: {} ({})",
            self.config.level.name, self.config.level.file
        );
    }
}

/// Drives `update()` once per tick until shutdown is initiated.
///
/// A context assembly failure means the subsystem set is misconfigured, so
/// the process exits rather than keep rejecting clients.
fn spawn_tick_loop(
    server: Arc<NetworkServer>,
    period: Duration,
    shutdown_state: ShutdownState,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if shutdown_state.is_shutdown_initiated() {
                break;
            }

            if let Err(e) = server.update() {
                error!("❌ Server error: {}", e);
                std::process::exit(1);
            }
        }
    })
}

/// Initiates shutdown and waits up to `wait` for the tick loop to exit.
/// Shutdown is marked complete only if it did.
async fn stop_tick_loop(tick_handle: JoinHandle<()>, shutdown_state: &ShutdownState, wait: Duration) {
    shutdown_state.initiate_shutdown();

    info!("⏳ Waiting for the tick loop to stop...");
    match timeout(wait, tick_handle).await {
        Ok(Ok(())) => shutdown_state.complete_shutdown(),
        Ok(Err(e)) => warn!("Tick loop ended abnormally: {e}"),
        Err(_) => warn!("⏰ Tick loop did not stop within timeout, proceeding"),
    }
}

/// Logs the diagnostics report every `period`.
fn spawn_diagnostics(server: Arc<NetworkServer>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            for line in server.render_diagnostics().lines() {
                info!("📊 {}", line);
            }
        }
    })
}

fn log_final_statistics(server: &NetworkServer, shutdown_state: &ShutdownState) {
    let registry = server.registry();
    info!("📊 Final Statistics:");
    if !shutdown_state.is_shutdown_complete() {
        warn!("  - Tick loop was still running at shutdown");
    }
    info!("  - Clients admitted: {}", registry.len());
    info!("  - Still connected: {}", registry.connected_count());
}
