//! Engine process supervision
//!
//! The engine is a windowed application that outlives any one daemon
//! run, so it is spawned detached and watched through the process
//! table rather than a child handle.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use crate::procs::ProcessScanner;

/// Engine image names, preferred edition first
pub const PROCESS_NAMES: [&str; 4] = [
    "voicemeeterpro.exe",
    "voicemeeter8x64.exe",
    "voicemeeter8.exe",
    "voicemeeter.exe",
];

/// Time a freshly launched engine needs before logins succeed
pub const INIT_WAIT: Duration = Duration::from_secs(4);

/// Grace between the shutdown command and a forced kill
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub fn is_engine_running(scanner: &mut ProcessScanner) -> bool {
    scanner.first_running(&PROCESS_NAMES).is_some()
}

/// Locate the engine executable under the configured directory or the
/// conventional install paths, preferring the larger editions.
pub fn find_executable(engine_dir: Option<&Path>) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(dir) = engine_dir {
        dirs.push(dir.to_path_buf());
    }
    dirs.extend(super::default_install_dirs());

    for dir in dirs {
        for name in PROCESS_NAMES {
            let exe = dir.join(name);
            if exe.exists() {
                return Some(exe);
            }
        }
    }
    None
}

/// Spawn the engine detached. False when no executable exists or the
/// spawn fails; the caller continues degraded either way.
pub fn launch(engine_dir: Option<&Path>) -> bool {
    let Some(exe) = find_executable(engine_dir) else {
        warn!("engine executable not found, install it or set engine_dir");
        return false;
    };

    let mut cmd = Command::new(&exe);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(crate::procs::CREATE_NO_WINDOW);
    }
    match cmd.spawn() {
        Ok(_) => {
            info!(exe = %exe.display(), "engine launched");
            true
        }
        Err(e) => {
            warn!(exe = %exe.display(), %e, "engine launch failed");
            false
        }
    }
}

/// Hard-kill any engine process still alive. Returns the kill count.
pub fn kill(scanner: &mut ProcessScanner) -> usize {
    let mut killed = 0;
    for name in PROCESS_NAMES {
        killed += scanner.kill_by_name(name);
    }
    if killed > 0 {
        warn!(killed, "engine force-killed");
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_executable_prefers_larger_edition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("voicemeeter.exe"), b"").unwrap();
        std::fs::write(dir.path().join("voicemeeterpro.exe"), b"").unwrap();

        let found = find_executable(Some(dir.path())).unwrap();
        assert_eq!(found, dir.path().join("voicemeeterpro.exe"));
    }

    #[test]
    fn test_find_executable_handles_missing_install() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_executable(Some(dir.path())), None);
    }

    #[test]
    fn test_launch_without_executable_fails_quietly() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!launch(Some(dir.path())));
    }

    #[test]
    fn test_engine_not_running_on_clean_host() {
        let mut scanner = ProcessScanner::new();
        assert!(!is_engine_running(&mut scanner));
        assert_eq!(kill(&mut scanner), 0);
    }
}
