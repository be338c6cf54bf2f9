//! Process table scans and termination
//!
//! Thin wrapper over `sysinfo`. Refreshes are not cheap, so each owner
//! keeps one scanner and refreshes once per poll or tick rather than
//! per query. All name matching is case-insensitive; Windows reports
//! image names with mixed casing depending on how a process started.

use sysinfo::{Pid, Signal, System};

/// Creation flag that keeps spawned console children from opening a window.
#[cfg(windows)]
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub struct ProcessScanner {
    sys: System,
}

impl ProcessScanner {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    fn refresh(&mut self) {
        self.sys.refresh_processes();
    }

    /// Whether a process with this image name is currently alive.
    pub fn is_running(&mut self, name: &str) -> bool {
        self.refresh();
        let lower = name.to_lowercase();
        self.sys
            .processes()
            .values()
            .any(|p| p.name().to_lowercase() == lower)
    }

    /// First name from `names` with a live process, in process-table order.
    pub fn first_running<S: AsRef<str>>(&mut self, names: &[S]) -> Option<String> {
        self.refresh();
        let lowered: Vec<String> = names.iter().map(|n| n.as_ref().to_lowercase()).collect();
        self.sys.processes().values().find_map(|p| {
            let name = p.name().to_lowercase();
            lowered.contains(&name).then_some(name)
        })
    }

    /// Ask every process with this image name to exit. Uses a soft
    /// signal where the platform has one and a hard kill elsewhere.
    pub fn terminate_by_name(&mut self, name: &str) -> usize {
        self.refresh();
        let lower = name.to_lowercase();
        self.sys
            .processes()
            .values()
            .filter(|p| p.name().to_lowercase() == lower)
            .filter(|p| p.kill_with(Signal::Term).unwrap_or_else(|| p.kill()))
            .count()
    }

    /// Hard-kill every process with this image name. Returns the count.
    pub fn kill_by_name(&mut self, name: &str) -> usize {
        self.refresh();
        let lower = name.to_lowercase();
        self.sys
            .processes()
            .values()
            .filter(|p| p.name().to_lowercase() == lower)
            .filter(|p| p.kill())
            .count()
    }

    /// Whether a PID refers to a live process.
    pub fn pid_alive(&mut self, pid: u32) -> bool {
        self.sys.refresh_process(Pid::from_u32(pid))
    }
}

impl Default for ProcessScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_pid_is_alive() {
        let mut scanner = ProcessScanner::new();
        assert!(scanner.pid_alive(std::process::id()));
    }

    #[test]
    fn test_absurd_pid_is_dead() {
        let mut scanner = ProcessScanner::new();
        assert!(!scanner.pid_alive(u32::MAX));
    }

    #[test]
    fn test_unknown_process_is_not_running() {
        let mut scanner = ProcessScanner::new();
        assert!(!scanner.is_running("definitely-not-a-process-zzz.exe"));
        assert_eq!(
            scanner.first_running(&["also-not-real.exe", "nope.exe"]),
            None
        );
    }

    #[test]
    fn test_kill_of_unknown_process_kills_nothing() {
        let mut scanner = ProcessScanner::new();
        assert_eq!(scanner.kill_by_name("definitely-not-a-process-zzz.exe"), 0);
        assert_eq!(scanner.terminate_by_name("definitely-not-a-process-zzz.exe"), 0);
    }
}
