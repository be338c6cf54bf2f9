//! Event types for daemon and control-surface communication
//!
//! The daemon broadcasts `DaemonEvent`s to any attached collaborator
//! (tray icon, mixer window, log mirror) and accepts `ControlRequest`s
//! on an mpsc channel. Both serialize as tagged JSON so an external
//! surface can speak the same protocol over a pipe later.

use serde::{Deserialize, Serialize};

use crate::mode::{OutputTarget, UserMode};

/// Events emitted by the session orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonEvent {
    /// Debounced VR runtime presence changed
    PresenceChanged { present: bool },

    /// A session started: engine up, state restored, routing applied
    SessionStarted,

    /// The session was torn down and its state persisted
    SessionEnded {
        /// Duration in milliseconds that the session was active
        duration_ms: u64,
    },

    /// The user mode changed (request, control surface, or fallback rule)
    ModeChanged { mode: UserMode },

    /// Application audio was redirected to a new target
    OutputSwitched { target: OutputTarget },

    /// The engine process disappeared mid-session; a restart must be
    /// requested explicitly
    EngineDown,

    /// The engine came back and its parameters were restored
    EngineRestarted,
}

impl std::fmt::Display for DaemonEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonEvent::PresenceChanged { present } => {
                write!(f, "PRESENCE_CHANGED ({})", if *present { "present" } else { "absent" })
            }
            DaemonEvent::SessionStarted => write!(f, "SESSION_STARTED"),
            DaemonEvent::SessionEnded { duration_ms } => {
                write!(f, "SESSION_ENDED ({}ms)", duration_ms)
            }
            DaemonEvent::ModeChanged { mode } => write!(f, "MODE_CHANGED ({})", mode),
            DaemonEvent::OutputSwitched { target } => write!(f, "OUTPUT_SWITCHED ({})", target),
            DaemonEvent::EngineDown => write!(f, "ENGINE_DOWN"),
            DaemonEvent::EngineRestarted => write!(f, "ENGINE_RESTARTED"),
        }
    }
}

/// Requests accepted by the session orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Select a user mode
    SetMode { mode: UserMode },

    /// Relaunch the engine and restore its parameters
    RestartEngine,

    /// Tear the session down and stop the VR runtime
    CloseSession,

    /// Clean up any active session and exit the daemon
    Quit,
}

impl std::fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlRequest::SetMode { mode } => write!(f, "SET_MODE ({})", mode),
            ControlRequest::RestartEngine => write!(f, "RESTART_ENGINE"),
            ControlRequest::CloseSession => write!(f, "CLOSE_SESSION"),
            ControlRequest::Quit => write!(f, "QUIT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = DaemonEvent::ModeChanged { mode: UserMode::SilentVr };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"mode_changed\""));
        assert!(json.contains("\"mode\":\"SILENT_VR\""));

        let event = DaemonEvent::OutputSwitched { target: OutputTarget::VrHeadset };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"output_switched\""));
        assert!(json.contains("\"target\":\"vr_headset\""));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"session_ended","duration_ms":90000}"#;
        let event: DaemonEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, DaemonEvent::SessionEnded { duration_ms: 90000 }));
    }

    #[test]
    fn test_request_round_trip() {
        let request = ControlRequest::SetMode { mode: UserMode::Vr };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"set_mode","mode":"VR"}"#);

        let parsed: ControlRequest = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, ControlRequest::SetMode { mode: UserMode::Vr }));
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(DaemonEvent::SessionStarted.to_string(), "SESSION_STARTED");
        assert_eq!(
            DaemonEvent::PresenceChanged { present: true }.to_string(),
            "PRESENCE_CHANGED (present)"
        );
        assert_eq!(ControlRequest::Quit.to_string(), "QUIT");
        assert_eq!(
            ControlRequest::SetMode { mode: UserMode::Desktop }.to_string(),
            "SET_MODE (Desktop)"
        );
    }
}
