//! Windows binding to the engine's remote-control library
//!
//! The vendor DLL is loaded at runtime so the daemon still starts (and
//! reports a readable diagnostic) on machines where the engine is not
//! installed. Symbols and calling convention follow the vendor's
//! VoicemeeterRemote API.

use std::ffi::{c_char, CString};
use std::path::{Path, PathBuf};

use tracing::info;
use windows::core::{s, HSTRING};
use windows::Win32::Foundation::{FreeLibrary, HMODULE};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

use super::api::{EngineApi, EngineError, LoginStatus};

/// String parameters are documented to fit 512 bytes
const STRING_BUFFER: usize = 512;

type LoginFn = unsafe extern "system" fn() -> i32;
type LogoutFn = unsafe extern "system" fn() -> i32;
type GetFloatFn = unsafe extern "system" fn(*const c_char, *mut f32) -> i32;
type SetFloatFn = unsafe extern "system" fn(*const c_char, f32) -> i32;
type GetStringFn = unsafe extern "system" fn(*const c_char, *mut c_char) -> i32;
type SetStringFn = unsafe extern "system" fn(*const c_char, *const c_char) -> i32;

pub struct NativeEngine {
    module: HMODULE,
    login: LoginFn,
    logout: LogoutFn,
    get_float: GetFloatFn,
    set_float: SetFloatFn,
    get_string: GetStringFn,
    set_string: SetStringFn,
}

// Raw function pointers into a library that stays loaded for our
// lifetime; the vendor serializes calls internally.
unsafe impl Send for NativeEngine {}
unsafe impl Sync for NativeEngine {}

impl NativeEngine {
    /// Load the control library from the first candidate that exists
    pub fn load(candidates: &[PathBuf]) -> Result<Self, EngineError> {
        let path = candidates
            .iter()
            .find(|p| p.exists())
            .ok_or(EngineError::LibraryNotFound)?;
        Self::load_from(path)
    }

    fn load_from(path: &Path) -> Result<Self, EngineError> {
        let module = unsafe { LoadLibraryW(&HSTRING::from(path.as_os_str())) }.map_err(|e| {
            EngineError::LibraryLoad {
                path: path.to_path_buf(),
                detail: e.message().to_string(),
            }
        })?;

        unsafe {
            let login: LoginFn = std::mem::transmute(
                GetProcAddress(module, s!("VBVMR_Login"))
                    .ok_or(EngineError::MissingSymbol("VBVMR_Login"))?,
            );
            let logout: LogoutFn = std::mem::transmute(
                GetProcAddress(module, s!("VBVMR_Logout"))
                    .ok_or(EngineError::MissingSymbol("VBVMR_Logout"))?,
            );
            let get_float: GetFloatFn = std::mem::transmute(
                GetProcAddress(module, s!("VBVMR_GetParameterFloat"))
                    .ok_or(EngineError::MissingSymbol("VBVMR_GetParameterFloat"))?,
            );
            let set_float: SetFloatFn = std::mem::transmute(
                GetProcAddress(module, s!("VBVMR_SetParameterFloat"))
                    .ok_or(EngineError::MissingSymbol("VBVMR_SetParameterFloat"))?,
            );
            let get_string: GetStringFn = std::mem::transmute(
                GetProcAddress(module, s!("VBVMR_GetParameterStringA"))
                    .ok_or(EngineError::MissingSymbol("VBVMR_GetParameterStringA"))?,
            );
            let set_string: SetStringFn = std::mem::transmute(
                GetProcAddress(module, s!("VBVMR_SetParameterStringA"))
                    .ok_or(EngineError::MissingSymbol("VBVMR_SetParameterStringA"))?,
            );

            info!(path = %path.display(), "engine control library loaded");
            Ok(Self {
                module,
                login,
                logout,
                get_float,
                set_float,
                get_string,
                set_string,
            })
        }
    }
}

fn param_name(param: &str) -> Result<CString, EngineError> {
    CString::new(param).map_err(|_| EngineError::BadParameter(param.to_string()))
}

impl EngineApi for NativeEngine {
    fn login(&self) -> Result<LoginStatus, EngineError> {
        // 0: engine already up; 1: the library had to launch it
        match unsafe { (self.login)() } {
            0 => Ok(LoginStatus::Connected),
            1 => Ok(LoginStatus::LaunchedEngine),
            code => Err(EngineError::LoginFailed(code)),
        }
    }

    fn logout(&self) -> Result<(), EngineError> {
        match unsafe { (self.logout)() } {
            0 => Ok(()),
            code => Err(EngineError::CallFailed {
                name: "logout".to_string(),
                code,
            }),
        }
    }

    fn get_float(&self, param: &str) -> Result<f32, EngineError> {
        let name = param_name(param)?;
        let mut value = 0f32;
        match unsafe { (self.get_float)(name.as_ptr(), &mut value) } {
            0 => Ok(value),
            code => Err(EngineError::CallFailed {
                name: param.to_string(),
                code,
            }),
        }
    }

    fn set_float(&self, param: &str, value: f32) -> Result<(), EngineError> {
        let name = param_name(param)?;
        match unsafe { (self.set_float)(name.as_ptr(), value) } {
            0 => Ok(()),
            code => Err(EngineError::CallFailed {
                name: param.to_string(),
                code,
            }),
        }
    }

    fn get_string(&self, param: &str) -> Result<String, EngineError> {
        let name = param_name(param)?;
        let mut buf = [0 as c_char; STRING_BUFFER];
        match unsafe { (self.get_string)(name.as_ptr(), buf.as_mut_ptr()) } {
            0 => {
                let bytes: Vec<u8> = buf
                    .iter()
                    .take_while(|&&c| c != 0)
                    .map(|&c| c as u8)
                    .collect();
                Ok(String::from_utf8_lossy(&bytes).trim().to_string())
            }
            code => Err(EngineError::CallFailed {
                name: param.to_string(),
                code,
            }),
        }
    }

    fn set_string(&self, param: &str, value: &str) -> Result<(), EngineError> {
        let name = param_name(param)?;
        let value =
            CString::new(value).map_err(|_| EngineError::BadParameter(value.to_string()))?;
        match unsafe { (self.set_string)(name.as_ptr(), value.as_ptr()) } {
            0 => Ok(()),
            code => Err(EngineError::CallFailed {
                name: param.to_string(),
                code,
            }),
        }
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        let _ = unsafe { FreeLibrary(self.module) };
    }
}
