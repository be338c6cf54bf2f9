//! Persisted session files
//!
//! Three JSON files live next to the config: the hardware device
//! bindings saved at session end, the engine parameter snapshot the
//! control surface maintains, and the state file collaborators read
//! and write mode requests through. Every load is tolerant: missing,
//! empty, or malformed files yield defaults so a corrupt disk never
//! keeps a session from starting.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::mode::UserMode;

pub const DEVICES_FILE: &str = "vm_devices.json";
pub const PARAMS_FILE: &str = "vm_state.json";
pub const STATE_FILE: &str = "state.json";

/// Hardware channels whose device bindings are saved and restored.
/// Strips are inputs, buses are outputs; higher indices are virtual
/// and need no binding.
pub const DEVICE_KEYS: [&str; 6] = [
    "Strip[0]",
    "Strip[1]",
    "Strip[2]",
    "Bus[0]",
    "Bus[1]",
    "Bus[2]",
];

/// Neutral parameter set applied before any snapshot exists
pub fn default_params(music_strip: u32) -> BTreeMap<String, f32> {
    let mut params = BTreeMap::new();
    for key in [
        "Strip[0].Gain".to_string(),
        format!("Strip[{}].Gain", music_strip),
        "Bus[3].Gain".to_string(),
        "Bus[4].Gain".to_string(),
        format!("Strip[{}].eqgain1", music_strip),
        format!("Strip[{}].eqgain2", music_strip),
        format!("Strip[{}].eqgain3", music_strip),
    ] {
        params.insert(key, 0.0);
    }
    params
}

/// Routing flags re-asserted after every restore. The engine resets
/// these while loading its own settings, and the control surface never
/// saves them: hardware mic into the mic bus, music into the headset
/// bus, neither strip direct to hardware out.
pub fn forced_flags(music_strip: u32) -> [(String, f32); 4] {
    [
        ("Strip[0].B1".to_string(), 1.0),
        (format!("Strip[{}].B2", music_strip), 1.0),
        ("Strip[0].A1".to_string(), 0.0),
        (format!("Strip[{}].A1", music_strip), 0.0),
    ]
}

/// File-backed store under the daemon's data directory
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_json(&self, file: &str) -> Option<Value> {
        let path = self.dir.join(file);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(file, %e, "ignoring malformed persisted file");
                None
            }
        }
    }

    fn write_json(&self, file: &str, value: &Value) {
        let path = self.dir.join(file);
        match serde_json::to_string_pretty(value) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&path, raw) {
                    warn!(file, %e, "failed to persist file");
                }
            }
            Err(e) => warn!(file, %e, "failed to serialize persisted file"),
        }
    }

    /// Device bindings saved at the end of the last session
    pub fn load_devices(&self) -> BTreeMap<String, String> {
        self.read_json(DEVICES_FILE)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Persist device bindings. An empty map is not written; a failed
    /// query must not clobber a good file.
    pub fn save_devices(&self, devices: &BTreeMap<String, String>) {
        if devices.is_empty() {
            debug!("no device bindings to save");
            return;
        }
        self.write_json(DEVICES_FILE, &json!(devices));
        info!(count = devices.len(), "saved device assignments");
    }

    /// Engine parameter snapshot, or neutral defaults when none exists
    pub fn load_params(&self, music_strip: u32) -> BTreeMap<String, f32> {
        if let Some(value) = self.read_json(PARAMS_FILE) {
            if let Ok(params) = serde_json::from_value(value) {
                return params;
            }
            warn!("parameter snapshot has unexpected shape, using defaults");
        }
        default_params(music_strip)
    }

    /// Publish mode and presence for collaborators. Unknown keys in the
    /// state file belong to them and are preserved; any pending mode
    /// request is cleared because this write reflects it.
    pub fn save_state(&self, mode: UserMode, vr_present: bool) {
        let mut state = match self.read_json(STATE_FILE) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        state.insert("current_mode".to_string(), json!(mode));
        state.insert("vr_present".to_string(), json!(vr_present));
        state.remove("requested_mode");
        self.write_json(STATE_FILE, &Value::Object(state));
    }

    /// Mode requested by a collaborator through the state file, if any.
    /// Consuming the request clears it so it applies exactly once.
    pub fn take_requested_mode(&self) -> Option<UserMode> {
        let mut state = match self.read_json(STATE_FILE) {
            Some(Value::Object(map)) => map,
            _ => return None,
        };
        let requested = state.remove("requested_mode")?;
        let mode: UserMode = match serde_json::from_value(requested) {
            Ok(mode) => mode,
            Err(_) => {
                // Drop an unparseable request instead of retrying it forever
                self.write_json(STATE_FILE, &Value::Object(state));
                return None;
            }
        };
        state.insert("requested_mode".to_string(), Value::Null);
        state.insert("current_mode".to_string(), json!(mode));
        self.write_json(STATE_FILE, &Value::Object(state));
        Some(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_missing_files_yield_defaults() {
        let (_dir, store) = store();
        assert!(store.load_devices().is_empty());
        let params = store.load_params(3);
        assert_eq!(params.get("Strip[3].Gain"), Some(&0.0));
        assert_eq!(params.get("Bus[3].Gain"), Some(&0.0));
        assert!(store.take_requested_mode().is_none());
    }

    #[test]
    fn test_corrupt_files_yield_defaults() {
        let (dir, store) = store();
        std::fs::write(dir.path().join(DEVICES_FILE), "{not json").unwrap();
        std::fs::write(dir.path().join(PARAMS_FILE), "[1, 2, 3]").unwrap();
        assert!(store.load_devices().is_empty());
        assert!(store.load_params(3).contains_key("Strip[3].eqgain1"));
    }

    #[test]
    fn test_device_round_trip() {
        let (_dir, store) = store();
        let mut devices = BTreeMap::new();
        devices.insert("Strip[0]".to_string(), "Microphone (USB Audio)".to_string());
        devices.insert("Bus[0]".to_string(), "Speakers (Realtek)".to_string());
        store.save_devices(&devices);
        assert_eq!(store.load_devices(), devices);
    }

    #[test]
    fn test_empty_devices_never_clobber() {
        let (_dir, store) = store();
        let mut devices = BTreeMap::new();
        devices.insert("Bus[0]".to_string(), "Speakers".to_string());
        store.save_devices(&devices);
        store.save_devices(&BTreeMap::new());
        assert_eq!(store.load_devices(), devices);
    }

    #[test]
    fn test_param_snapshot_read() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join(PARAMS_FILE),
            r#"{"Strip[3].Gain": -12.5, "Bus[3].Gain": 2.0}"#,
        )
        .unwrap();
        let params = store.load_params(3);
        assert_eq!(params.get("Strip[3].Gain"), Some(&-12.5));
        assert_eq!(params.get("Bus[3].Gain"), Some(&2.0));
        assert_eq!(params.len(), 2, "snapshot replaces defaults wholesale");
    }

    #[test]
    fn test_state_write_preserves_foreign_keys() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join(STATE_FILE),
            r#"{"mixer_tab": "eq", "requested_mode": "VR"}"#,
        )
        .unwrap();
        store.save_state(UserMode::Auto, false);

        let raw = std::fs::read_to_string(dir.path().join(STATE_FILE)).unwrap();
        let state: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(state["mixer_tab"], "eq");
        assert_eq!(state["current_mode"], "AUTO");
        assert_eq!(state["vr_present"], false);
        assert!(state.get("requested_mode").is_none());
    }

    #[test]
    fn test_requested_mode_is_consumed_once() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join(STATE_FILE),
            r#"{"requested_mode": "SILENT_VR"}"#,
        )
        .unwrap();

        assert_eq!(store.take_requested_mode(), Some(UserMode::SilentVr));
        assert_eq!(store.take_requested_mode(), None);

        let raw = std::fs::read_to_string(dir.path().join(STATE_FILE)).unwrap();
        let state: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(state["current_mode"], "SILENT_VR");
        assert!(state["requested_mode"].is_null());
    }

    #[test]
    fn test_invalid_requested_mode_is_dropped() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join(STATE_FILE),
            r#"{"requested_mode": "WARP_SPEED"}"#,
        )
        .unwrap();
        assert!(store.take_requested_mode().is_none());
        assert!(store.take_requested_mode().is_none());
    }

    #[test]
    fn test_forced_flags_use_music_strip() {
        let flags = forced_flags(3);
        assert!(flags.contains(&("Strip[0].B1".to_string(), 1.0)));
        assert!(flags.contains(&("Strip[3].B2".to_string(), 1.0)));
        assert!(flags.contains(&("Strip[0].A1".to_string(), 0.0)));
        assert!(flags.contains(&("Strip[3].A1".to_string(), 0.0)));
    }
}
