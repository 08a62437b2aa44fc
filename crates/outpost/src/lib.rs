//! # Outpost Server - Main Entry Point
//!
//! Wraps the `outpost_net` acceptor in a runnable server: CLI parsing,
//! configuration loading, logging setup, the tick loop and signal handling.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (TCP, first free port from 9000)
//! outpost
//!
//! # Accept clients through the UDP rendezvous handshake
//! outpost --transport udp --port 9100
//!
//! # JSON logging for production
//! outpost --config production.toml --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! The server handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod shutdown;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

pub use config::{LoggingSettings, ServerSettings};
pub use shutdown::ShutdownState;

/// Runs the Outpost server to completion.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
///
/// Called from `main` under `#[tokio::main]`.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file, before any override is validated.
    let mut logging_config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    logging_config.apply_cli(&args);

    if let Err(e) = logging::setup_logging(&logging_config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}
