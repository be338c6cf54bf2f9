//! Session orchestration
//!
//! One async task owns the whole session lifecycle. Presence edges and
//! control requests arrive over channels; an interval drives routing
//! enforcement while a session is active. Engine and utility work runs
//! inline here with bounded waits, so a wedged external tool can delay
//! a transition but never deadlock the daemon.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{supervisor, EngineClient};
use crate::events::{ControlRequest, DaemonEvent};
use crate::mode::{self, OutputTarget, UserMode};
use crate::persist::{forced_flags, Store, DEVICE_KEYS};
use crate::presence::{PresenceDetector, PresenceEvent};
use crate::procs::ProcessScanner;
use crate::routing::AudioRouter;

use super::Phase;

/// Device binds need a moment before parameter writes land
const DEVICE_SETTLE: Duration = Duration::from_secs(1);

/// The engine rewrites some flags while finishing its own startup
const PARAM_SETTLE: Duration = Duration::from_millis(500);

/// Reconnect schedule after an engine relaunch
const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// How long the VR runtime gets to exit on an explicit close
const VR_STOP_WAIT: Duration = Duration::from_secs(15);

/// Routing state guarded by one lock so a control request and an
/// enforcement tick can never interleave their engine and utility
/// calls.
struct RoutingState {
    router: AudioRouter,
    current: Option<OutputTarget>,
    confirmed: bool,
    mic_enabled: Option<bool>,
}

pub struct SessionOrchestrator {
    config: Config,
    store: Store,
    engine: EngineClient,
    routing: Mutex<RoutingState>,
    scanner: ProcessScanner,
    detector: Arc<PresenceDetector>,
    event_tx: broadcast::Sender<DaemonEvent>,
    phase: Phase,
    mode: UserMode,
    vr_present: bool,
    engine_down_reported: bool,
    session_started_at: Option<Instant>,
    mixer: Option<tokio::process::Child>,
}

impl SessionOrchestrator {
    pub fn new(
        config: Config,
        store: Store,
        engine: EngineClient,
        router: AudioRouter,
        detector: Arc<PresenceDetector>,
        event_tx: broadcast::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            routing: Mutex::new(RoutingState {
                router,
                current: None,
                confirmed: false,
                mic_enabled: None,
            }),
            scanner: ProcessScanner::new(),
            detector,
            event_tx,
            phase: Phase::Idle,
            mode: UserMode::Auto,
            vr_present: false,
            engine_down_reported: false,
            session_started_at: None,
            mixer: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> UserMode {
        self.mode
    }

    fn emit(&self, event: DaemonEvent) {
        // Nobody may be subscribed; that's fine
        let _ = self.event_tx.send(event);
    }

    /// Main loop. Returns on a Quit request or when both channels close.
    pub async fn run(
        &mut self,
        mut presence_rx: mpsc::Receiver<PresenceEvent>,
        mut control_rx: mpsc::Receiver<ControlRequest>,
    ) {
        info!(phase = %self.phase, "orchestrator started");
        let mut ticker = tokio::time::interval(self.config.enforce_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = presence_rx.recv() => {
                    match event {
                        Some(event) => self.handle_presence(event, &mut presence_rx).await,
                        None => {
                            warn!("presence channel closed");
                            break;
                        }
                    }
                }

                request = control_rx.recv() => {
                    match request {
                        Some(request) => {
                            if !self.handle_control(request, &mut presence_rx).await {
                                break;
                            }
                        }
                        None => {
                            debug!("control channel closed");
                            break;
                        }
                    }
                }

                _ = ticker.tick(), if self.phase == Phase::Active => {
                    self.enforce_tick().await;
                }
            }
        }
        info!("orchestrator stopped");
    }

    async fn handle_presence(
        &mut self,
        event: PresenceEvent,
        presence_rx: &mut mpsc::Receiver<PresenceEvent>,
    ) {
        match event {
            PresenceEvent::Appeared => {
                self.vr_present = true;
                self.emit(DaemonEvent::PresenceChanged { present: true });
                match self.phase {
                    Phase::Idle => self.start_session().await,
                    Phase::Active => debug!("presence signal while already active"),
                    Phase::Cleanup => debug!("presence signal during cleanup ignored"),
                }
                self.write_state();
            }
            PresenceEvent::Vanished => {
                self.vr_present = false;
                self.emit(DaemonEvent::PresenceChanged { present: false });
                if self.phase == Phase::Active {
                    self.end_session(false).await;
                    self.finish_cleanup(presence_rx);
                } else {
                    self.write_state();
                }
            }
        }
    }

    /// Returns false when the daemon should exit
    async fn handle_control(
        &mut self,
        request: ControlRequest,
        presence_rx: &mut mpsc::Receiver<PresenceEvent>,
    ) -> bool {
        info!(%request, "control request");
        match request {
            ControlRequest::SetMode { mode } => {
                self.set_mode(mode).await;
                true
            }
            ControlRequest::RestartEngine => {
                if self.phase == Phase::Active {
                    self.restart_engine().await;
                } else {
                    debug!("engine restart requested outside a session");
                }
                true
            }
            ControlRequest::CloseSession => {
                if self.phase == Phase::Active {
                    self.end_session(true).await;
                    self.finish_cleanup(presence_rx);
                }
                true
            }
            ControlRequest::Quit => {
                if self.phase == Phase::Active {
                    self.end_session(false).await;
                    self.finish_cleanup(presence_rx);
                }
                false
            }
        }
    }

    /// Post-cleanup bookkeeping: presence edges raised while we were
    /// tearing down describe a session that no longer exists, so they
    /// are dropped and the detector re-baselines.
    fn finish_cleanup(&mut self, presence_rx: &mut mpsc::Receiver<PresenceEvent>) {
        let mut stale = 0u32;
        while presence_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "dropped presence edges raised during cleanup");
        }
        self.detector.reset();
    }

    async fn set_mode(&mut self, mode: UserMode) {
        if mode == self.mode {
            return;
        }
        info!(from = %self.mode, to = %mode, "user mode changed");
        self.mode = mode;
        self.write_state();
        self.emit(DaemonEvent::ModeChanged { mode });
        if self.phase == Phase::Active {
            self.apply_routing(false).await;
        }
    }

    async fn start_session(&mut self) {
        info!("VR runtime present, starting session");
        self.phase = Phase::Active;
        self.session_started_at = Some(Instant::now());
        self.engine_down_reported = false;
        {
            let mut rs = self.routing.lock().await;
            rs.current = None;
            rs.confirmed = false;
            rs.mic_enabled = None;
        }

        // Every session begins following the runtime
        if self.mode != UserMode::Auto {
            self.mode = UserMode::Auto;
            self.emit(DaemonEvent::ModeChanged { mode: UserMode::Auto });
        }
        self.write_state();

        self.ensure_engine_process().await;
        if !self.engine.connect() {
            warn!("engine connection failed at session start, continuing degraded");
        }
        self.restore_engine_state().await;
        self.apply_routing(true).await;
        self.spawn_mixer();
        self.emit(DaemonEvent::SessionStarted);
        info!(mode = %self.mode, "session active");
    }

    /// Launch the engine if its process is missing, then give it time
    /// to initialize before the login attempt
    async fn ensure_engine_process(&mut self) {
        if supervisor::is_engine_running(&mut self.scanner) {
            return;
        }
        if supervisor::launch(self.config.engine_dir.as_deref()) {
            tokio::time::sleep(supervisor::INIT_WAIT).await;
        }
    }

    /// Restore persisted device bindings and the parameter snapshot,
    /// then assert the routing flags the engine resets on its own
    /// startup
    async fn restore_engine_state(&mut self) {
        let devices = self.store.load_devices();
        if !devices.is_empty() {
            for (key, name) in &devices {
                let ok = self.engine.set_string(&format!("{}.device.wdm", key), name);
                info!(key = %key, device = %name, ok, "restored device binding");
            }
            tokio::time::sleep(DEVICE_SETTLE).await;
        }

        let params = self.store.load_params(self.config.music_strip);
        for (param, value) in &params {
            self.engine.set_float(param, *value);
        }
        for (param, value) in forced_flags(self.config.music_strip) {
            self.engine.set_float(&param, value);
        }
        tokio::time::sleep(PARAM_SETTLE).await;
        self.assert_fixed_flags();
        debug!(params = params.len(), "engine parameters restored");
    }

    /// The two flags the engine most likes to revert: hardware mic into
    /// the mic bus, music into the headset bus
    fn assert_fixed_flags(&self) {
        self.engine.set_float("Strip[0].B1", 1.0);
        self.engine
            .set_float(&format!("Strip[{}].B2", self.config.music_strip), 1.0);
    }

    /// Recompute desired output and mic routing and push both out. The
    /// routing lock spans all of it.
    async fn apply_routing(&mut self, force: bool) {
        let desired = mode::desired_output(self.mode, self.vr_present);
        let desired_mic = mode::desired_mic_routing(self.mode);

        let mut rs = self.routing.lock().await;

        if force || rs.current != Some(desired) || !rs.confirmed {
            if rs.router.switch_to(desired).await {
                let changed = rs.current != Some(desired);
                rs.current = Some(desired);
                rs.confirmed = true;
                if changed {
                    info!(target = %desired, "application audio switched");
                    self.emit(DaemonEvent::OutputSwitched { target: desired });
                }
            } else {
                // Retried on the next enforcement tick
                rs.confirmed = false;
            }
        }

        if force || rs.mic_enabled != Some(desired_mic) {
            let param = format!("Strip[{}].B1", self.config.music_strip);
            if self.engine.set_float(&param, if desired_mic { 1.0 } else { 0.0 }) {
                if rs.mic_enabled != Some(desired_mic) {
                    info!(enabled = desired_mic, "music-to-mic routing changed");
                }
                rs.mic_enabled = Some(desired_mic);
            }
        }

        if force {
            self.assert_fixed_flags();
        }
    }

    /// One enforcement cycle: pick up external config and mode edits,
    /// re-assert routing, check engine health
    async fn enforce_tick(&mut self) {
        if let Some(exclusions) = Config::reload_exclusions(self.store.dir()) {
            self.routing.lock().await.router.set_user_exclusions(exclusions);
        }
        if let Some(requested) = self.store.take_requested_mode() {
            info!(mode = %requested, "mode request from control surface");
            self.set_mode(requested).await;
        }
        self.apply_routing(true).await;
        self.check_engine_health();
    }

    /// Report a vanished engine exactly once; restarting is an explicit
    /// request, never automatic, so a user shutting the engine down on
    /// purpose does not fight the daemon
    fn check_engine_health(&mut self) {
        if supervisor::is_engine_running(&mut self.scanner) {
            return;
        }
        if !self.engine_down_reported {
            warn!("engine process disappeared mid-session");
            self.engine_down_reported = true;
            self.emit(DaemonEvent::EngineDown);
        }
    }

    /// Relaunch the engine and bring back its persisted state
    async fn restart_engine(&mut self) {
        info!("restarting engine");
        self.engine.disconnect();
        if !supervisor::is_engine_running(&mut self.scanner)
            && supervisor::launch(self.config.engine_dir.as_deref())
        {
            tokio::time::sleep(supervisor::INIT_WAIT).await;
        }

        let mut connected = false;
        for attempt in 1..=RECONNECT_ATTEMPTS {
            if self.engine.connect() {
                connected = true;
                break;
            }
            debug!(attempt, "engine reconnect failed");
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
        if !connected {
            warn!("engine did not come back after restart");
        }

        self.restore_engine_state().await;
        self.engine_down_reported = false;
        self.emit(DaemonEvent::EngineRestarted);
        self.apply_routing(true).await;
    }

    /// Tear the session down. Best-effort throughout: every step runs
    /// even when earlier ones fail, and every wait is bounded.
    async fn end_session(&mut self, explicit_close: bool) {
        info!(explicit_close, "ending session");
        self.phase = Phase::Cleanup;

        // A forced-VR mode must not outlive the runtime it assumes
        let fallback = mode::fallback_on_absent(self.mode);
        if fallback != self.mode {
            info!(from = %self.mode, "VR runtime gone, falling back to Auto");
            self.mode = fallback;
            self.emit(DaemonEvent::ModeChanged { mode: fallback });
        }
        self.vr_present = false;
        self.write_state();

        // Issued twice: the first pass can land before an app that is
        // shutting down has re-registered its session on the desktop
        {
            let rs = self.routing.lock().await;
            rs.router.switch_to(OutputTarget::Desktop).await;
            rs.router.switch_to(OutputTarget::Desktop).await;
        }

        // Resting state re-shares music into the mic bus
        self.engine
            .set_float(&format!("Strip[{}].B1", self.config.music_strip), 1.0);

        self.save_device_assignments();
        self.stop_mixer().await;
        self.shutdown_engine().await;

        if explicit_close {
            self.stop_vr_runtime().await;
        }

        let duration_ms = self
            .session_started_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.phase = Phase::Idle;
        self.write_state();
        self.emit(DaemonEvent::SessionEnded { duration_ms });
        info!(duration_ms, "session ended");
    }

    /// Persist which physical devices the engine is bound to, queried
    /// live while the engine is still up
    fn save_device_assignments(&mut self) {
        let mut devices = BTreeMap::new();
        for key in DEVICE_KEYS {
            let name = self.engine.get_string(&format!("{}.device.name", key));
            if !name.is_empty() {
                devices.insert(key.to_string(), name);
            }
        }
        self.store.save_devices(&devices);
    }

    async fn shutdown_engine(&mut self) {
        self.engine.request_shutdown();
        tokio::time::sleep(supervisor::SHUTDOWN_GRACE).await;
        if supervisor::is_engine_running(&mut self.scanner) {
            supervisor::kill(&mut self.scanner);
        }
        self.engine.disconnect();
    }

    /// Ask the VR runtime to exit; kill it when the bounded wait runs out
    async fn stop_vr_runtime(&mut self) {
        let name = self.config.vr_process.clone();
        if !self.scanner.is_running(&name) {
            return;
        }
        info!(process = %name, "asking VR runtime to exit");
        self.scanner.terminate_by_name(&name);

        let deadline = tokio::time::Instant::now() + VR_STOP_WAIT;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if !self.scanner.is_running(&name) {
                info!(process = %name, "VR runtime exited");
                return;
            }
        }
        warn!(process = %name, "VR runtime still alive, killing");
        self.scanner.kill_by_name(&name);
    }

    /// Launch the configured control surface for this session, if any
    fn spawn_mixer(&mut self) {
        let Some(command) = &self.config.mixer_command else {
            return;
        };
        let Some((program, args)) = command.split_first() else {
            return;
        };
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(crate::procs::CREATE_NO_WINDOW);
        match cmd.spawn() {
            Ok(child) => {
                info!(program = %program, "control surface launched");
                self.mixer = Some(child);
            }
            Err(e) => warn!(program = %program, %e, "control surface launch failed"),
        }
    }

    async fn stop_mixer(&mut self) {
        if let Some(mut child) = self.mixer.take() {
            if let Err(e) = child.kill().await {
                debug!(%e, "control surface already gone");
            }
        }
    }

    fn write_state(&self) {
        self.store.save_state(self.mode, self.vr_present);
    }

    /// Cleanup hook for process shutdown; equivalent to a Quit request
    pub async fn shutdown(&mut self) {
        if self.phase == Phase::Active {
            self.end_session(false).await;
        }
    }
}
