//! Application audio switching
//!
//! `switch_to` is idempotent: re-issuing the current target succeeds
//! without noise, which lets the enforcement loop re-assert routing
//! every cycle against apps that launched mid-session or reset their
//! own sessions.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::Config;
use crate::mode::OutputTarget;

use super::cli::UtilityCli;
use super::devices::{self, DeviceHints};
use super::RoutingError;

/// Processes whose audio is never redirected: the VR stack itself, the
/// engine, and Windows audio infrastructure.
pub const SYSTEM_EXCLUDE: [&str; 13] = [
    "vrchat.exe",
    "vrserver.exe",
    "vrmonitor.exe",
    "vrwebhelper.exe",
    "steamwebhelper.exe",
    "voicemeeterpro.exe",
    "voicemeeter.exe",
    "voicemeeter8.exe",
    "voicemeeter8x64.exe",
    "svchost.exe",
    "rundll32.exe",
    "audiodg.exe",
    "dwm.exe",
];

pub struct AudioRouter {
    cli: UtilityCli,
    vr_device: String,
    hints: DeviceHints,
    user_exclude: BTreeSet<String>,
    /// Legacy single-target mode, active when the config has no
    /// exclusion list at all
    legacy_target: Option<String>,
}

impl AudioRouter {
    pub fn from_config(config: &Config, data_dir: &Path) -> Self {
        let legacy_target = match config.exclude_processes {
            Some(_) => None,
            None => Some(config.target_process.to_lowercase()),
        };
        Self {
            cli: UtilityCli::new(config.svcl_path_in(data_dir), data_dir),
            vr_device: config.vr_device.clone(),
            hints: DeviceHints {
                headset: config.headset_device_hints.clone(),
                speaker: config.speaker_device_hints.clone(),
                display: config.display_device_hints.clone(),
                virtuals: config.virtual_device_hints.clone(),
            },
            user_exclude: lowered(config.exclude_processes.clone().unwrap_or_default()),
            legacy_target,
        }
    }

    /// Swap in a freshly reloaded exclusion list. `None` (the key
    /// disappeared) leaves the current list alone rather than silently
    /// flipping an active session into legacy mode.
    pub fn set_user_exclusions(&mut self, exclude: Option<Vec<String>>) {
        if let Some(list) = exclude {
            self.user_exclude = lowered(list);
        }
    }

    /// Executable names currently holding render audio sessions
    pub async fn list_audio_apps(&self) -> Result<BTreeSet<String>, RoutingError> {
        let text = self.cli.export_csv(devices::APP_COLUMNS, "enum_apps").await?;
        Ok(devices::app_process_names(&devices::parse_apps(&text)))
    }

    /// Best desktop device identifier; the OS default when enumeration
    /// fails or finds no candidate
    pub async fn pick_desktop_device(&self) -> String {
        match self.cli.export_csv(devices::DEVICE_COLUMNS, "enum_devices").await {
            Ok(text) => devices::pick_desktop_device(
                &devices::parse_devices(&text),
                &self.hints,
                &self.vr_device,
            ),
            Err(e) => {
                warn!(%e, "device enumeration failed, using OS default");
                devices::DEFAULT_RENDER_DEVICE.to_string()
            }
        }
    }

    /// Redirect application audio to the target. True iff at least one
    /// process was actually redirected.
    pub async fn switch_to(&self, target: OutputTarget) -> bool {
        let device = match target {
            OutputTarget::VrHeadset => self.vr_device.clone(),
            OutputTarget::Desktop => self.pick_desktop_device().await,
        };

        if let Some(process) = &self.legacy_target {
            return self.switch_legacy(&device, process).await;
        }

        let apps = match self.list_audio_apps().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!(%e, "audio app enumeration failed");
                return false;
            }
        };
        let targets = redirect_set(&apps, &self.user_exclude);
        if targets.is_empty() {
            debug!("no redirect candidates");
            return false;
        }

        let total = targets.len();
        let mut ok = 0usize;
        for process in &targets {
            match self.cli.set_app_default(&device, process).await {
                Ok(true) => ok += 1,
                Ok(false) => debug!(process, "utility matched no sessions"),
                Err(e) => warn!(process, %e, "redirect failed"),
            }
        }
        debug!(ok, total, device = %device, "switched application audio");
        ok > 0
    }

    /// Legacy mode drives exactly one process and skips it entirely
    /// when it has no audio session.
    async fn switch_legacy(&self, device: &str, process: &str) -> bool {
        let has_session = match self.list_audio_apps().await {
            Ok(apps) => apps.contains(process),
            Err(_) => false,
        };
        if !has_session {
            debug!(process, "legacy target has no audio session");
            return false;
        }
        matches!(self.cli.set_app_default(device, process).await, Ok(true))
    }
}

fn lowered(list: Vec<String>) -> BTreeSet<String> {
    list.into_iter().map(|p| p.to_lowercase()).collect()
}

/// Processes to redirect: everything holding an audio session minus
/// the fixed system set and the user's exclusions
pub fn redirect_set(apps: &BTreeSet<String>, user_exclude: &BTreeSet<String>) -> Vec<String> {
    apps.iter()
        .filter(|p| !SYSTEM_EXCLUDE.contains(&p.as_str()))
        .filter(|p| !user_exclude.contains(*p))
        .cloned()
        .collect()
}
