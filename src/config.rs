//! Configuration loading and management
//!
//! The daemon reads `config.json` from its per-user data directory.
//! A setup wizard writes the file once; here we only parse, validate,
//! and re-read the parts that are hot-reloadable. Every field carries
//! a default so a hand-edited or partial file still parses; `validate`
//! decides which omissions mean setup never ran.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::routing::DeviceHints;

pub const CONFIG_FILE: &str = "config.json";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between presence polls
    pub poll_interval_seconds: u64,

    /// Seconds a presence change must clear before it is reported
    pub debounce_seconds: u64,

    /// Seconds between enforcement cycles while a session is active
    pub enforce_interval_seconds: u64,

    /// Image name of the VR runtime process to watch
    pub vr_process: String,

    /// Processes whose audio is never redirected. When the key is
    /// absent entirely, the daemon runs in legacy single-target mode.
    pub exclude_processes: Option<Vec<String>>,

    /// Legacy mode only: the one process whose output is switched
    pub target_process: String,

    /// Routing utility executable; bare names resolve against the data
    /// directory
    pub svcl_path: PathBuf,

    /// Output device identifier of the VR headset
    pub vr_device: String,

    /// Engine install directory. Conventional locations are probed
    /// when unset.
    pub engine_dir: Option<PathBuf>,

    /// Engine strip index carrying music (a virtual input)
    pub music_strip: u32,

    /// Device-name substrings marking VR headsets
    pub headset_device_hints: Vec<String>,

    /// Device-name substrings marking named speakers (preferred desktop tier)
    pub speaker_device_hints: Vec<String>,

    /// Device-name substrings marking display audio (last desktop tier)
    pub display_device_hints: Vec<String>,

    /// Device-name substrings marking virtual endpoints (never desktop)
    pub virtual_device_hints: Vec<String>,

    /// Command line of the control surface to launch with each session
    pub mixer_command: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let hints = DeviceHints::default();
        Self {
            poll_interval_seconds: 3,
            debounce_seconds: 5,
            enforce_interval_seconds: 15,
            vr_process: "vrserver.exe".to_string(),
            exclude_processes: None,
            target_process: "chrome.exe".to_string(),
            svcl_path: PathBuf::new(),
            vr_device: String::new(),
            engine_dir: None,
            music_strip: 3,
            headset_device_hints: hints.headset,
            speaker_device_hints: hints.speaker,
            display_device_hints: hints.display,
            virtual_device_hints: hints.virtuals,
            mixer_command: None,
        }
    }
}

impl Config {
    /// Per-user data directory holding config and state files
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vr-audio-daemon")
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    /// Load and validate configuration from `config.json` under `dir`.
    /// A missing file is fatal: the setup wizard has to run first.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::path_in(dir);
        let raw = std::fs::read_to_string(&path).with_context(|| {
            format!("no configuration at {} (run the setup wizard first)", path.display())
        })?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("malformed configuration at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fields whose absence means setup never completed
    pub fn validate(&self) -> Result<()> {
        if self.vr_device.is_empty() {
            bail!("vr_device is not configured (run the setup wizard first)");
        }
        if self.svcl_path.as_os_str().is_empty() {
            bail!("svcl_path is not configured (run the setup wizard first)");
        }
        Ok(())
    }

    /// Re-read the exclusion list so edits made by a settings surface
    /// apply without a restart. `None` when the file is unreadable.
    pub fn reload_exclusions(dir: &Path) -> Option<Option<Vec<String>>> {
        let raw = std::fs::read_to_string(Self::path_in(dir)).ok()?;
        let config: Self = serde_json::from_str(&raw).ok()?;
        Some(config.exclude_processes)
    }

    /// Routing utility path with bare names resolved against `dir`
    pub fn svcl_path_in(&self, dir: &Path) -> PathBuf {
        if self.svcl_path.is_absolute() {
            self.svcl_path.clone()
        } else {
            dir.join(&self.svcl_path)
        }
    }

    /// Ensure the data directory exists
    pub fn ensure_dirs(dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_seconds)
    }

    pub fn enforce_interval(&self) -> Duration {
        Duration::from_secs(self.enforce_interval_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.poll_interval_seconds, 3);
        assert_eq!(config.debounce_seconds, 5);
        assert_eq!(config.enforce_interval_seconds, 15);
        assert_eq!(config.vr_process, "vrserver.exe");
        assert_eq!(config.music_strip, 3);
        assert!(config.exclude_processes.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let raw = r#"{"vr_device": "Headset Earphone", "svcl_path": "svcl.exe"}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.vr_device, "Headset Earphone");
        assert_eq!(config.poll_interval_seconds, 3);
        assert!(config.exclude_processes.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unconfigured_device() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vr_device = "Headset Earphone".to_string();
        assert!(config.validate().is_err(), "svcl_path still missing");
        config.svcl_path = PathBuf::from("svcl.exe");
        config.validate().unwrap();
    }

    #[test]
    fn test_load_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("setup wizard"));
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.vr_device = "Headset Earphone (Index HMD)".to_string();
        config.svcl_path = PathBuf::from("svcl.exe");
        config.exclude_processes = Some(vec!["vrchat.exe".to_string()]);
        let raw = serde_json::to_string_pretty(&config).unwrap();
        std::fs::write(Config::path_in(dir.path()), raw).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.vr_device, config.vr_device);
        assert_eq!(loaded.exclude_processes, Some(vec!["vrchat.exe".to_string()]));
    }

    #[test]
    fn test_reload_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::reload_exclusions(dir.path()).is_none());

        let raw = r#"{"exclude_processes": ["spotify.exe"]}"#;
        std::fs::write(Config::path_in(dir.path()), raw).unwrap();
        let reloaded = Config::reload_exclusions(dir.path()).unwrap();
        assert_eq!(reloaded, Some(vec!["spotify.exe".to_string()]));
    }

    #[test]
    fn test_svcl_path_resolution() {
        let mut config = Config::default();
        config.svcl_path = PathBuf::from("svcl.exe");
        assert_eq!(
            config.svcl_path_in(Path::new("/data")),
            PathBuf::from("/data/svcl.exe")
        );

        let absolute = std::env::temp_dir().join("svcl.exe");
        config.svcl_path = absolute.clone();
        assert_eq!(config.svcl_path_in(Path::new("/data")), absolute);
    }
}
