//! Signal handling for graceful shutdown

use tracing::debug;

/// Handles shutdown signals (Ctrl-C everywhere, SIGTERM on Unix)
pub struct ShutdownSignal;

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        Self
    }

    /// Wait for a shutdown signal
    #[cfg(unix)]
    pub async fn wait(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = async {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to register interrupt handler");
            } => {
                debug!("received interrupt");
            }
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
            }
        }
    }

    /// Wait for a shutdown signal
    #[cfg(not(unix))]
    pub async fn wait(&self) {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to register interrupt handler");
        debug!("received interrupt");
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
