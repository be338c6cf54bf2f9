//! VR runtime presence detection
//!
//! A dedicated poll thread scans the process table on a fixed interval
//! and reports debounced presence edges into the orchestrator's
//! channel.

mod detector;

pub use detector::{Debouncer, Presence, PresenceDetector, PresenceError, PresenceEvent};
