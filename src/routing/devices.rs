//! Utility export parsing and desktop-device selection
//!
//! The routing utility exports CSV tables: one of per-application
//! audio sessions, one of devices. Desktop selection is tiered: a
//! recognizably named speaker beats an unclassified device, which
//! beats display audio (HDMI), so a TV hanging off a graphics card
//! only wins when nothing else is plugged in. Virtual endpoints and
//! the VR headset itself never qualify.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::debug;

/// Identifier the utility resolves to the OS default render device
pub const DEFAULT_RENDER_DEVICE: &str = "DefaultRenderDevice";

/// Columns requested when enumerating application audio sessions
pub const APP_COLUMNS: &str = "Name,Type,Direction,Process Path";

/// Columns requested when enumerating devices. Kept in sync with the
/// setup wizard, which reads the same export format.
pub const DEVICE_COLUMNS: &str =
    "Name,Command-Line Friendly ID,Item ID,Direction,Type,Device State,Device Name";

#[derive(Debug, Default, Deserialize)]
pub struct AppRow {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Direction", default)]
    pub direction: String,
    #[serde(rename = "Process Path", default)]
    pub process_path: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceRow {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Command-Line Friendly ID", default)]
    pub friendly_id: String,
    #[serde(rename = "Direction", default)]
    pub direction: String,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Device State", default)]
    pub state: String,
    #[serde(rename = "Device Name", default)]
    pub device_name: String,
}

fn reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes())
}

pub fn parse_apps(text: &str) -> Vec<AppRow> {
    reader(text).deserialize().filter_map(|row| row.ok()).collect()
}

pub fn parse_devices(text: &str) -> Vec<DeviceRow> {
    reader(text).deserialize().filter_map(|row| row.ok()).collect()
}

/// Executable names (lower-cased) of live application render sessions.
/// System sounds and capture sessions have no process path and drop out.
pub fn app_process_names(rows: &[AppRow]) -> BTreeSet<String> {
    rows.iter()
        .filter(|row| row.kind == "Application" && row.direction == "Render")
        .filter_map(|row| {
            let path = row.process_path.as_str();
            if path.is_empty() {
                return None;
            }
            // The utility reports Windows paths; split on both separators
            let file = path.rsplit(['\\', '/']).next().filter(|f| !f.is_empty())?;
            Some(file.to_lowercase())
        })
        .collect()
}

/// Substring lists driving device classification. Shipped as config
/// data; these defaults cover common hardware.
#[derive(Debug, Clone)]
pub struct DeviceHints {
    pub headset: Vec<String>,
    pub speaker: Vec<String>,
    pub display: Vec<String>,
    pub virtuals: Vec<String>,
}

impl Default for DeviceHints {
    fn default() -> Self {
        fn list(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            headset: list(&[
                "steam streaming",
                "vive",
                "index",
                "quest",
                "rift",
                "reverb",
                "varjo",
                "pimax",
                "bigscreen",
            ]),
            speaker: list(&[
                "speaker",
                "soundbar",
                "realtek",
                "logitech",
                "bose",
                "sonos",
                "jbl",
            ]),
            display: list(&[
                "hdmi",
                "display audio",
                "nvidia high definition",
                "amd high definition",
                "monitor",
            ]),
            virtuals: list(&["voicemeeter", "vb-audio", "cable", "virtual"]),
        }
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|n| !n.is_empty() && haystack.contains(&n.to_lowercase()))
}

/// Pick the identifier of the best desktop render device.
///
/// Only active physical render devices are candidates. Tier order:
/// named speakers, then unclassified devices, then display audio. When
/// nothing qualifies the OS default stands in.
pub fn pick_desktop_device(rows: &[DeviceRow], hints: &DeviceHints, vr_device: &str) -> String {
    let vr_lower = vr_device.to_lowercase();
    let mut unclassified: Option<&DeviceRow> = None;
    let mut display: Option<&DeviceRow> = None;

    for row in rows {
        if row.direction != "Render" || row.kind != "Device" || row.state != "Active" {
            continue;
        }
        let label =
            format!("{} {} {}", row.name, row.device_name, row.friendly_id).to_lowercase();
        if contains_any(&label, &hints.virtuals) || contains_any(&label, &hints.headset) {
            continue;
        }
        if !vr_lower.is_empty() && label.contains(&vr_lower) {
            continue;
        }
        if contains_any(&label, &hints.speaker) {
            debug!(device = %row.name, "desktop device picked (speaker tier)");
            return device_id(row);
        }
        if contains_any(&label, &hints.display) {
            display.get_or_insert(row);
        } else {
            unclassified.get_or_insert(row);
        }
    }

    if let Some(row) = unclassified.or(display) {
        debug!(device = %row.name, "desktop device picked");
        return device_id(row);
    }
    debug!("no desktop candidate, using OS default render device");
    DEFAULT_RENDER_DEVICE.to_string()
}

/// Command-line identifier for a device row
fn device_id(row: &DeviceRow) -> String {
    if row.friendly_id.is_empty() {
        row.name.clone()
    } else {
        row.friendly_id.clone()
    }
}
