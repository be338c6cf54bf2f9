//! Routing-utility invocation
//!
//! Exports go through a CSV temp file in the data directory because
//! the utility has no structured stdout mode. Every invocation is
//! bounded by a timeout and the child is killed if we stop waiting;
//! a wedged utility must never stall a session transition.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::RoutingError;

/// Bound on any single utility invocation
pub const UTILITY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct UtilityCli {
    exe: PathBuf,
    work_dir: PathBuf,
}

impl UtilityCli {
    pub fn new(exe: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            work_dir: work_dir.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(crate::procs::CREATE_NO_WINDOW);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, RoutingError> {
        let mut cmd = self.command();
        cmd.args(args);
        debug!(?args, "running routing utility");
        tokio::time::timeout(UTILITY_TIMEOUT, cmd.output())
            .await
            .map_err(|_| RoutingError::Timeout(UTILITY_TIMEOUT))?
            .map_err(RoutingError::Io)
    }

    /// Export a CSV table through a temp file and return its contents.
    /// The temp file is removed afterwards, success or not.
    pub async fn export_csv(&self, columns: &str, tag: &str) -> Result<String, RoutingError> {
        let tmp = self.work_dir.join(format!("_{}.csv", tag));
        let tmp_arg = tmp.to_string_lossy().to_string();

        let result = self.run(&["/scomma", &tmp_arg, "/Columns", columns]).await;
        let text = std::fs::read_to_string(&tmp);
        if let Err(e) = std::fs::remove_file(&tmp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(%e, "could not remove utility export");
            }
        }

        result?;
        text.map_err(|e| RoutingError::Export(e.to_string()))
    }

    /// Redirect every audio session of one process to a device. True
    /// when the utility reports at least one matched item.
    pub async fn set_app_default(&self, device: &str, process: &str) -> Result<bool, RoutingError> {
        let output = self
            .run(&["/Stdout", "/SetAppDefault", device, "all", process])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.contains("1 item") || stdout.contains("items found"))
    }
}

#[cfg(all(test, unix))]
pub(super) mod fixtures {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Shell stand-in for the routing utility: answers app and device
    /// enumerations with canned CSV and accepts redirects, logging them
    /// to calls.log next to the script.
    pub fn fake_utility(dir: &Path) -> PathBuf {
        let script = dir.join("fake-svcl.sh");
        let body = r#"#!/bin/sh
here="$(dirname "$0")"
file=""
cols=""
while [ $# -gt 0 ]; do
  case "$1" in
    /scomma) file="$2"; shift 2 ;;
    /Columns) cols="$2"; shift 2 ;;
    /SetAppDefault)
      shift
      echo "$@" >> "$here/calls.log"
      echo "Setting default render device: 1 item"
      exit 0
      ;;
    *) shift ;;
  esac
done
case "$cols" in
  *"Process Path"*)
    cat > "$file" <<'EOF'
Name,Type,Direction,Process Path
Spotify,Application,Render,C:\Apps\Spotify\Spotify.exe
Discord,Application,Render,C:\Apps\Discord\Discord.exe
VRChat,Application,Render,C:\Games\VRChat\VRChat.exe
System Sounds,Application,Render,
EOF
    ;;
  *)
    cat > "$file" <<'EOF'
Name,Command-Line Friendly ID,Item ID,Direction,Type,Device State,Device Name
Speakers,Speakers\Realtek,id1,Render,Device,Active,Realtek High Definition Audio
LG TV,LG\HDMI,id2,Render,Device,Active,NVIDIA High Definition Audio
EOF
    ;;
esac
exit 0
"#;
        std::fs::write(&script, body).unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        script
    }

    pub fn redirect_calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_utility_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = UtilityCli::new(dir.path().join("nope.exe"), dir.path());
        let err = cli.export_csv(super::super::devices::APP_COLUMNS, "enum_apps").await;
        assert!(matches!(err, Err(RoutingError::Io(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_export_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let script = super::fixtures::fake_utility(dir.path());
        let cli = UtilityCli::new(&script, dir.path());

        let text = cli
            .export_csv(super::super::devices::APP_COLUMNS, "enum_apps")
            .await
            .unwrap();
        assert!(text.contains("Spotify.exe"));
        // Temp file is gone after the export
        assert!(!dir.path().join("_enum_apps.csv").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_redirect_reports_matched_items() {
        let dir = tempfile::tempdir().unwrap();
        let script = super::fixtures::fake_utility(dir.path());
        let cli = UtilityCli::new(&script, dir.path());

        let ok = cli
            .set_app_default("Speakers\\Realtek", "spotify.exe")
            .await
            .unwrap();
        assert!(ok);
        let calls = super::fixtures::redirect_calls(dir.path());
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("spotify.exe"));
    }
}
