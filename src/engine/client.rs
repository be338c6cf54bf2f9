//! Resilient engine client
//!
//! Wraps the raw control interface with lazy login and no-throw
//! degradation: callers get a neutral value and a logged diagnostic
//! instead of an error. Any failed call marks the connection stale so
//! the next call starts from login again; the session keeps running
//! with reduced function while the engine is away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::api::{EngineApi, EngineError, LoginStatus};

/// Pseudo-parameter asking the engine to save its settings and exit
const SHUTDOWN_COMMAND: &str = "Command.Shutdown";

/// The engine needs a moment after login before parameter calls land
const LOGIN_SETTLE: Duration = Duration::from_millis(100);

pub struct EngineClient {
    api: Box<dyn EngineApi>,
    connected: AtomicBool,
}

impl EngineClient {
    pub fn new(api: Box<dyn EngineApi>) -> Self {
        Self {
            api,
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Log in to the engine. Returns false when it is unreachable.
    pub fn connect(&self) -> bool {
        self.ensure_connected()
    }

    fn ensure_connected(&self) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            return true;
        }
        match self.api.login() {
            Ok(status) => {
                if status == LoginStatus::LaunchedEngine {
                    info!("engine was down, control library launched it");
                } else {
                    debug!("engine login ok");
                }
                std::thread::sleep(LOGIN_SETTLE);
                self.connected.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!(%e, "engine login failed");
                false
            }
        }
    }

    fn degrade(&self, call: &str, param: &str, e: &EngineError) {
        warn!(param, %e, "engine {} failed, marking connection stale", call);
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Read a float parameter; 0.0 when the engine is unreachable
    pub fn get_float(&self, param: &str) -> f32 {
        if !self.ensure_connected() {
            return 0.0;
        }
        match self.api.get_float(param) {
            Ok(value) => value,
            Err(e) => {
                self.degrade("get_float", param, &e);
                0.0
            }
        }
    }

    /// Write a float parameter; false when the engine is unreachable
    pub fn set_float(&self, param: &str, value: f32) -> bool {
        if !self.ensure_connected() {
            return false;
        }
        match self.api.set_float(param, value) {
            Ok(()) => true,
            Err(e) => {
                self.degrade("set_float", param, &e);
                false
            }
        }
    }

    /// Read a string parameter; empty when the engine is unreachable
    pub fn get_string(&self, param: &str) -> String {
        if !self.ensure_connected() {
            return String::new();
        }
        match self.api.get_string(param) {
            Ok(value) => value,
            Err(e) => {
                self.degrade("get_string", param, &e);
                String::new()
            }
        }
    }

    /// Write a string parameter; false when the engine is unreachable
    pub fn set_string(&self, param: &str, value: &str) -> bool {
        if !self.ensure_connected() {
            return false;
        }
        match self.api.set_string(param, value) {
            Ok(()) => true,
            Err(e) => {
                self.degrade("set_string", param, &e);
                false
            }
        }
    }

    /// Ask the engine to exit gracefully. Returns immediately; callers
    /// watch the process table for the actual exit.
    pub fn request_shutdown(&self) {
        if self.set_float(SHUTDOWN_COMMAND, 1.0) {
            info!("engine shutdown command sent");
        }
    }

    /// Log out and drop the connection. Safe when already disconnected.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.api.logout() {
                debug!(%e, "engine logout failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::super::api::test_support::FakeEngine;
    use super::*;

    fn client() -> (Arc<FakeEngine>, EngineClient) {
        let fake = Arc::new(FakeEngine::new());
        let client = EngineClient::new(Box::new(Arc::clone(&fake)));
        (fake, client)
    }

    #[test]
    fn test_values_round_trip_through_engine() {
        let (fake, client) = client();
        assert!(client.set_float("Strip[3].Gain", -6.0));
        assert_eq!(client.get_float("Strip[3].Gain"), -6.0);
        assert!(client.set_string("Strip[0].device.wdm", "Microphone"));
        assert_eq!(client.get_string("Strip[0].device.wdm"), "Microphone");
        assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unreachable_engine_degrades_to_defaults() {
        let (fake, client) = client();
        fake.set_failing(true);
        assert!(!client.connect());
        assert_eq!(client.get_float("Strip[0].Gain"), 0.0);
        assert_eq!(client.get_string("Bus[0].device.name"), "");
        assert!(!client.set_float("Strip[0].Gain", 1.0));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_failed_call_marks_stale_then_reconnects() {
        let (fake, client) = client();
        assert!(client.connect());
        assert!(client.is_connected());

        fake.set_failing(true);
        assert!(!client.set_float("Strip[0].B1", 1.0));
        assert!(!client.is_connected());

        fake.set_failing(false);
        assert!(client.set_float("Strip[0].B1", 1.0));
        assert_eq!(fake.logins.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shutdown_command() {
        let (fake, client) = client();
        client.request_shutdown();
        assert_eq!(fake.float("Command.Shutdown"), Some(1.0));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (fake, client) = client();
        assert!(client.connect());
        client.disconnect();
        client.disconnect();
        assert_eq!(fake.logouts.load(Ordering::SeqCst), 1);
    }
}
