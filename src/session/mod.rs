//! Session lifecycle
//!
//! Idle while watching for the VR runtime, Active while it runs,
//! Cleanup while tearing down. At most one session ever exists; the
//! phase lives on the orchestrator, not in a global.

mod orchestrator;

pub use orchestrator::SessionOrchestrator;

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Watching for the VR runtime
    #[default]
    Idle,
    /// Session running: engine up, routing enforced
    Active,
    /// Tearing down; presence signals are ignored
    Cleanup,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Active => write!(f, "Active"),
            Phase::Cleanup => write!(f, "Cleanup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_phase_is_idle() {
        assert_eq!(Phase::default(), Phase::Idle);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Idle.to_string(), "Idle");
        assert_eq!(Phase::Active.to_string(), "Active");
        assert_eq!(Phase::Cleanup.to_string(), "Cleanup");
    }
}
