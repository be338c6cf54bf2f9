//! Mixing-engine control
//!
//! The engine is an external application (a virtual mixer) controlled
//! through a vendor DLL. This module provides the typed control trait,
//! a resilient client over it, the Windows runtime binding, and
//! process supervision for launching and stopping the engine itself.

pub mod api;
mod client;
#[cfg(windows)]
mod native;
pub mod supervisor;

use std::path::{Path, PathBuf};

use api::{EngineApi, UnavailableEngine};

pub use client::EngineClient;

/// File name of the engine's remote-control library
pub const LIBRARY_NAME: &str = "VoicemeeterRemote64.dll";

/// Conventional engine install directories, probed when no explicit
/// directory is configured
pub fn default_install_dirs() -> [PathBuf; 2] {
    [
        PathBuf::from(r"C:\Program Files (x86)\VB\Voicemeeter"),
        PathBuf::from(r"C:\Program Files\VB\Voicemeeter"),
    ]
}

/// Candidate paths for the control library, configured directory first
pub fn library_candidates(engine_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(dir) = engine_dir {
        dirs.push(dir.to_path_buf());
    }
    dirs.extend(default_install_dirs());
    dirs.into_iter().map(|dir| dir.join(LIBRARY_NAME)).collect()
}

/// Build the best available engine control for this host. Falls back
/// to a stub that fails every call, leaving routing functional while
/// engine control degrades.
pub fn create_engine_api(engine_dir: Option<&Path>) -> Box<dyn EngineApi> {
    let candidates = library_candidates(engine_dir);
    #[cfg(windows)]
    match native::NativeEngine::load(&candidates) {
        Ok(engine) => return Box::new(engine),
        Err(e) => tracing::warn!(%e, "engine control library unavailable, continuing degraded"),
    }
    #[cfg(not(windows))]
    {
        tracing::warn!(
            probed = candidates.len(),
            "engine control is Windows-only, continuing degraded"
        );
    }
    Box::new(UnavailableEngine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_candidates_prefer_configured_dir() {
        let configured = PathBuf::from("/opt/engine");
        let candidates = library_candidates(Some(&configured));
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0], configured.join(LIBRARY_NAME));
        assert!(candidates.iter().all(|p| p.ends_with(LIBRARY_NAME)));
    }

    #[test]
    fn test_library_candidates_without_config() {
        let candidates = library_candidates(None);
        assert_eq!(candidates.len(), 2);
    }
}
