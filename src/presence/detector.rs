//! Presence poll thread with debounced edge reporting
//!
//! The VR runtime flaps during crashes, updates, and slow shutdowns.
//! Raw polls run every few seconds; an edge is only reported when it
//! lands outside the debounce window of the previous reported
//! transition, and flickers inside the window are discarded rather
//! than deferred. The very first poll establishes a baseline without
//! reporting anything, so a daemon started mid-session stays quiet
//! until something actually changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::procs::ProcessScanner;

/// Last reported presence value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// No poll has completed yet
    Unknown,
    Absent,
    Present,
}

/// Edge events sent to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Appeared,
    Vanished,
}

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("presence detector is already running")]
    AlreadyRunning,

    #[error("failed to spawn poll thread: {0}")]
    ThreadSpawn(String),
}

/// Debounce state machine, fed one raw observation per poll
#[derive(Debug)]
pub struct Debouncer {
    stable: Presence,
    last_change: Option<Instant>,
    window: Duration,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            stable: Presence::Unknown,
            last_change: None,
            window,
        }
    }

    /// Feed one raw poll result. Returns the new presence value when
    /// this observation is a reportable edge, `None` otherwise.
    pub fn observe(&mut self, raw: bool, now: Instant) -> Option<bool> {
        let observed = if raw { Presence::Present } else { Presence::Absent };
        if self.stable == Presence::Unknown {
            // Baseline only. last_change stays unset so a genuine
            // change right after startup is reported immediately.
            self.stable = observed;
            return None;
        }
        if observed == self.stable {
            return None;
        }
        let settled = match self.last_change {
            Some(at) => now.duration_since(at) >= self.window,
            None => true,
        };
        if !settled {
            debug!(?observed, "presence flicker inside debounce window, discarded");
            return None;
        }
        self.stable = observed;
        self.last_change = Some(now);
        Some(raw)
    }

    /// Forget everything; the next observation is a fresh baseline
    pub fn reset(&mut self) {
        self.stable = Presence::Unknown;
        self.last_change = None;
    }

    pub fn stable(&self) -> Presence {
        self.stable
    }
}

/// Owns the poll thread watching for the VR runtime process
pub struct PresenceDetector {
    process_name: String,
    poll_interval: Duration,
    window: Duration,
    event_tx: mpsc::Sender<PresenceEvent>,
    running: Arc<AtomicBool>,
    reset_requested: Arc<AtomicBool>,
    stop_tx: Mutex<Option<std::sync::mpsc::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceDetector {
    pub fn new(
        process_name: impl Into<String>,
        poll_interval: Duration,
        window: Duration,
        event_tx: mpsc::Sender<PresenceEvent>,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            poll_interval,
            window,
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
            reset_requested: Arc::new(AtomicBool::new(false)),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the poll thread
    pub fn start(&self) -> Result<(), PresenceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PresenceError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);
        let reset_requested = Arc::clone(&self.reset_requested);
        let process_name = self.process_name.clone();
        let poll_interval = self.poll_interval;
        let window = self.window;

        let handle = thread::Builder::new()
            .name("presence-poll".to_string())
            .spawn(move || {
                info!(process = %process_name, "presence poll thread started");
                run_poll_loop(
                    &process_name,
                    poll_interval,
                    window,
                    &event_tx,
                    &reset_requested,
                    &stop_rx,
                );
                running.store(false, Ordering::SeqCst);
                info!("presence poll thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                PresenceError::ThreadSpawn(e.to_string())
            })?;

        *self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(stop_tx);
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Signal the poll thread to stop and join it
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let stop_tx = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("presence poll thread panicked");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Raw check against the live process table, bypassing the debounce
    pub fn is_running_now(&self) -> bool {
        ProcessScanner::new().is_running(&self.process_name)
    }

    /// Drop the debounce baseline. The poll thread re-establishes it on
    /// its next cycle without reporting an edge; used after cleanup so
    /// stale knowledge from the torn-down session cannot fire.
    pub fn reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }
}

fn run_poll_loop(
    process_name: &str,
    poll_interval: Duration,
    window: Duration,
    event_tx: &mpsc::Sender<PresenceEvent>,
    reset_requested: &AtomicBool,
    stop_rx: &std::sync::mpsc::Receiver<()>,
) {
    let mut scanner = ProcessScanner::new();
    let mut debounce = Debouncer::new(window);

    loop {
        if reset_requested.swap(false, Ordering::SeqCst) {
            debounce.reset();
        }

        let raw = scanner.is_running(process_name);
        if let Some(present) = debounce.observe(raw, Instant::now()) {
            info!(process = %process_name, present, "presence changed");
            let event = if present {
                PresenceEvent::Appeared
            } else {
                PresenceEvent::Vanished
            };
            if event_tx.blocking_send(event).is_err() {
                warn!("presence channel closed, stopping poll");
                break;
            }
        }

        match stop_rx.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            // Stop signal, or the detector itself was dropped
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_first_observation_is_silent_baseline() {
        let mut debounce = Debouncer::new(secs(5));
        let t0 = Instant::now();
        assert_eq!(debounce.observe(true, t0), None);
        assert_eq!(debounce.stable(), Presence::Present);
    }

    #[test]
    fn test_change_right_after_baseline_fires() {
        let mut debounce = Debouncer::new(secs(5));
        let t0 = Instant::now();
        debounce.observe(false, t0);
        // No prior reported transition, so no window applies yet
        assert_eq!(debounce.observe(true, t0 + secs(1)), Some(true));
    }

    #[test]
    fn test_flicker_inside_window_is_discarded() {
        let mut debounce = Debouncer::new(secs(5));
        let t0 = Instant::now();
        debounce.observe(false, t0);
        assert_eq!(debounce.observe(true, t0 + secs(1)), Some(true));
        // Crash-flap two seconds later: inside the window, dropped
        assert_eq!(debounce.observe(false, t0 + secs(3)), None);
        assert_eq!(debounce.stable(), Presence::Present);
        // Still gone once the window clears
        assert_eq!(debounce.observe(false, t0 + secs(7)), Some(false));
    }

    #[test]
    fn test_window_boundary_counts_as_settled() {
        let mut debounce = Debouncer::new(secs(5));
        let t0 = Instant::now();
        debounce.observe(false, t0);
        assert_eq!(debounce.observe(true, t0 + secs(1)), Some(true));
        assert_eq!(debounce.observe(false, t0 + secs(6)), Some(false));
    }

    #[test]
    fn test_sustained_value_reports_once() {
        let mut debounce = Debouncer::new(secs(5));
        let t0 = Instant::now();
        debounce.observe(false, t0);
        assert_eq!(debounce.observe(true, t0 + secs(1)), Some(true));
        assert_eq!(debounce.observe(true, t0 + secs(10)), None);
        assert_eq!(debounce.observe(true, t0 + secs(20)), None);
    }

    #[test]
    fn test_reset_rearms_baseline() {
        let mut debounce = Debouncer::new(secs(5));
        let t0 = Instant::now();
        debounce.observe(true, t0);
        debounce.reset();
        assert_eq!(debounce.stable(), Presence::Unknown);
        // Fresh baseline, not an edge
        assert_eq!(debounce.observe(false, t0 + secs(30)), None);
    }

    #[tokio::test]
    async fn test_detector_baseline_does_not_fire() {
        let (tx, mut rx) = mpsc::channel(8);
        let detector = PresenceDetector::new(
            "definitely-not-a-process-zzz.exe",
            Duration::from_millis(10),
            Duration::ZERO,
            tx,
        );
        detector.start().unwrap();
        assert!(detector.is_active());

        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(got.is_err(), "baseline must not produce an edge");

        detector.stop();
        assert!(!detector.is_active());
    }

    #[tokio::test]
    async fn test_detector_rejects_double_start() {
        let (tx, _rx) = mpsc::channel(8);
        let detector = PresenceDetector::new(
            "definitely-not-a-process-zzz.exe",
            Duration::from_millis(10),
            Duration::ZERO,
            tx,
        );
        detector.start().unwrap();
        assert!(matches!(detector.start(), Err(PresenceError::AlreadyRunning)));
        detector.stop();
    }

    #[tokio::test]
    async fn test_detector_restarts_after_stop() {
        let (tx, _rx) = mpsc::channel(8);
        let detector = PresenceDetector::new(
            "definitely-not-a-process-zzz.exe",
            Duration::from_millis(10),
            Duration::ZERO,
            tx,
        );
        detector.start().unwrap();
        detector.stop();
        detector.start().unwrap();
        detector.stop();
    }
}
