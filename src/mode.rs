//! User modes and output decisions
//!
//! Pure lookup logic: given the mode the user selected and whether the
//! VR runtime is currently present, decide where application audio goes
//! and whether music is routed into the VR microphone bus. No state
//! beyond the current mode lives here; the orchestrator owns that.

use serde::{Deserialize, Serialize};

/// Mode selected by the user (tray menu, control surface, or a
/// collaborator writing the state file)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserMode {
    /// Application audio forced to the desktop device
    Desktop,
    /// Follow the VR runtime: headset while present, desktop otherwise
    #[default]
    Auto,
    /// Forced headset output with music shared into the mic bus
    Vr,
    /// Forced headset output with music kept private to the headset
    SilentVr,
}

impl std::fmt::Display for UserMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserMode::Desktop => write!(f, "Desktop"),
            UserMode::Auto => write!(f, "Auto"),
            UserMode::Vr => write!(f, "VR"),
            UserMode::SilentVr => write!(f, "SilentVR"),
        }
    }
}

/// Where application audio should currently be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    Desktop,
    VrHeadset,
}

impl std::fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTarget::Desktop => write!(f, "Desktop"),
            OutputTarget::VrHeadset => write!(f, "VRHeadset"),
        }
    }
}

/// Output target for a mode and presence combination
pub fn desired_output(mode: UserMode, vr_present: bool) -> OutputTarget {
    match mode {
        UserMode::Desktop => OutputTarget::Desktop,
        UserMode::Vr | UserMode::SilentVr => OutputTarget::VrHeadset,
        UserMode::Auto => {
            if vr_present {
                OutputTarget::VrHeadset
            } else {
                OutputTarget::Desktop
            }
        }
    }
}

/// Whether music should be mixed into the VR microphone bus.
/// Only the shared VR mode routes music to listeners.
pub fn desired_mic_routing(mode: UserMode) -> bool {
    mode == UserMode::Vr
}

/// Mode to fall back to when the VR runtime disappears. Forced VR
/// modes must not outlive the runtime they assume.
pub fn fallback_on_absent(mode: UserMode) -> UserMode {
    match mode {
        UserMode::Vr | UserMode::SilentVr => UserMode::Auto,
        other => other,
    }
}
