//! Engine control interface
//!
//! Everything the daemon needs from the mixing engine fits in six
//! calls: login/logout and typed parameter get/set. The native binding
//! implements this against the vendor library; tests substitute the
//! in-memory fake.

use std::path::PathBuf;

/// Login outcomes the engine library reports as success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    /// The engine was already running
    Connected,
    /// The engine was down and the library launched it
    LaunchedEngine,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine control library not found")]
    LibraryNotFound,

    #[error("failed to load {path}: {detail}")]
    LibraryLoad { path: PathBuf, detail: String },

    #[error("control library is missing symbol {0}")]
    MissingSymbol(&'static str),

    #[error("login returned {0}")]
    LoginFailed(i32),

    #[error("call {name} returned {code}")]
    CallFailed { name: String, code: i32 },

    #[error("parameter contains NUL byte: {0:?}")]
    BadParameter(String),

    #[error("engine control is unavailable on this platform")]
    Unavailable,
}

/// Native control surface of the mixing engine.
///
/// Implementations must be callable from any thread; the vendor
/// library serializes calls internally.
pub trait EngineApi: Send + Sync {
    fn login(&self) -> Result<LoginStatus, EngineError>;
    fn logout(&self) -> Result<(), EngineError>;
    fn get_float(&self, param: &str) -> Result<f32, EngineError>;
    fn set_float(&self, param: &str, value: f32) -> Result<(), EngineError>;
    fn get_string(&self, param: &str) -> Result<String, EngineError>;
    fn set_string(&self, param: &str, value: &str) -> Result<(), EngineError>;
}

/// Stand-in when no control library could be loaded. Every call fails,
/// so the client degrades to defaults while routing keeps working.
pub struct UnavailableEngine;

impl EngineApi for UnavailableEngine {
    fn login(&self) -> Result<LoginStatus, EngineError> {
        Err(EngineError::Unavailable)
    }

    fn logout(&self) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    fn get_float(&self, _param: &str) -> Result<f32, EngineError> {
        Err(EngineError::Unavailable)
    }

    fn set_float(&self, _param: &str, _value: f32) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    fn get_string(&self, _param: &str) -> Result<String, EngineError> {
        Err(EngineError::Unavailable)
    }

    fn set_string(&self, _param: &str, _value: &str) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }
}
