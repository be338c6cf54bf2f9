//! vr-audio-daemon: Background daemon for automatic VR audio switching
//!
//! The daemon runs in the background and provides:
//! - VR runtime presence detection via debounced process polling
//! - Session orchestration of an external audio-mixing engine
//! - Per-application output redirection through a routing utility
//!
//! Scope:
//! - Presence-driven session lifecycle (Idle, Active, Cleanup)
//! - Engine snapshot restore, forced flags, mode-driven mic routing
//! - File-based collaboration with settings surfaces via state.json
//! - NO audio signal processing, device drivers, or user interface

mod config;
mod engine;
mod events;
mod lifecycle;
mod lock;
mod mode;
mod persist;
mod presence;
mod procs;
mod routing;
mod session;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::engine::EngineClient;
use crate::events::DaemonEvent;
use crate::lifecycle::ShutdownSignal;
use crate::lock::InstanceLock;
use crate::persist::Store;
use crate::presence::{PresenceDetector, PresenceEvent};
use crate::routing::AudioRouter;
use crate::session::SessionOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "vr-audio-daemon starting"
    );

    let data_dir = Config::default_dir();
    Config::ensure_dirs(&data_dir)?;

    // Refuse to run twice against the same data directory
    let _lock = InstanceLock::acquire(&data_dir)?;

    // Load configuration
    let config = Config::load(&data_dir)?;
    info!(
        vr_process = %config.vr_process,
        vr_device = %config.vr_device,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Create channels for inter-component communication
    // Presence detector -> orchestrator
    let (presence_tx, presence_rx) = mpsc::channel(32);
    // Control surfaces -> orchestrator (held open for the daemon's lifetime)
    let (_control_tx, control_rx) = mpsc::channel(32);
    // Orchestrator -> subscribers (event log)
    let (event_tx, _event_rx) = broadcast::channel::<DaemonEvent>(64);

    // Create the presence detector
    let detector = Arc::new(PresenceDetector::new(
        config.vr_process.clone(),
        config.poll_interval(),
        config.debounce(),
        presence_tx.clone(),
    ));

    // Engine client over the vendor library, or a stub when unavailable
    let engine = EngineClient::new(engine::create_engine_api(config.engine_dir.as_deref()));

    // Per-application routing through the external utility
    let router = AudioRouter::from_config(&config, &data_dir);

    let store = Store::new(data_dir.clone());

    let mut orchestrator = SessionOrchestrator::new(
        config,
        store,
        engine,
        router,
        detector.clone(),
        event_tx.clone(),
    );

    // Start the presence detector (runs on dedicated thread)
    match detector.start() {
        Ok(()) => {
            info!("presence detector started");
        }
        Err(e) => {
            error!(?e, "failed to start presence detector");
            warn!("continuing without presence detection - sessions will not start");
        }
    }

    // The first poll only establishes the detector's baseline, so a VR
    // runtime that is already up must be reported here
    if detector.is_running_now() {
        let _ = presence_tx.send(PresenceEvent::Appeared).await;
    }

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the orchestrator (processes presence edges and control requests)
        _ = orchestrator.run(presence_rx, control_rx) => {
            info!("orchestrator exited");
        }

        // Mirror daemon events into the log
        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "daemon event");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("event log handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    orchestrator.shutdown().await;
    detector.stop();

    info!("vr-audio-daemon stopped");

    Ok(())
}
