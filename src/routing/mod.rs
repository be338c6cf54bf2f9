//! Per-application audio routing
//!
//! Windows has no public API for moving another process's audio
//! sessions, so routing goes through an external command-line utility
//! (svcl). This module wraps its CSV exports and redirect commands and
//! decides which processes move and which device "desktop" means.

mod cli;
mod devices;
mod router;

use std::time::Duration;

pub use devices::{DeviceHints, DEFAULT_RENDER_DEVICE};
pub use router::{AudioRouter, SYSTEM_EXCLUDE};

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("routing utility timed out after {0:?}")]
    Timeout(Duration),

    #[error("routing utility failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not read utility export: {0}")]
    Export(String),
}
