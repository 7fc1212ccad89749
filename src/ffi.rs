//! FFI bindings for Crisis Flux
//!
//! This module provides C-compatible functions for driving the engine from
//! native app shells. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `crisis_free_string`.
//!
//! The host owns the tick cadence: call `crisis_engine_tick` once per second.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

use crate::config::EngineConfig;
use crate::engine::CrisisEngine;
use crate::types::SessionOutcome;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Opaque handle to a CrisisEngine
pub struct CrisisEngineHandle {
    engine: CrisisEngine,
}

/// Borrow the engine behind a handle, recording an error for NULL
unsafe fn engine_mut<'a>(handle: *mut CrisisEngineHandle) -> Option<&'a mut CrisisEngine> {
    if handle.is_null() {
        set_last_error("Null engine pointer");
        return None;
    }
    Some(&mut (*handle).engine)
}

/// Create an engine.
///
/// # Safety
/// - `config_json` may be NULL (defaults) or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `crisis_engine_free`.
/// - Returns NULL on error; call `crisis_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn crisis_engine_new(config_json: *const c_char) -> *mut CrisisEngineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string");
                return ptr::null_mut();
            }
        };
        match EngineConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match CrisisEngine::new(config) {
        Ok(engine) => Box::into_raw(Box::new(CrisisEngineHandle { engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Shut down and free an engine.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `crisis_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn crisis_engine_free(handle: *mut CrisisEngineHandle) {
    if !handle.is_null() {
        let mut handle = Box::from_raw(handle);
        handle.engine.shutdown();
    }
}

/// Feed one JSON event.
///
/// Returns 1 if the event was accepted, 0 if it was ignored as malformed,
/// and -1 on error (NULL pointers).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `crisis_engine_new`.
/// - `event_json` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn crisis_engine_record_event(
    handle: *mut CrisisEngineHandle,
    event_json: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(engine) = engine_mut(handle) else {
        return -1;
    };
    let json = match cstr_to_string(event_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid event string pointer");
            return -1;
        }
    };

    c_int::from(engine.record_event_json(&json))
}

/// Advance one tick.
///
/// Returns the update JSON if the visible state changed, the string `null`
/// if it did not, and NULL on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `crisis_engine_new`.
/// - The returned string must be freed with `crisis_free_string`.
#[no_mangle]
pub unsafe extern "C" fn crisis_engine_tick(handle: *mut CrisisEngineHandle) -> *mut c_char {
    clear_last_error();

    let Some(engine) = engine_mut(handle) else {
        return ptr::null_mut();
    };
    let update = engine.tick();
    to_json_cstr(&update)
}

/// Manual "exit crisis mode". Same return convention as `crisis_engine_tick`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `crisis_engine_new`.
/// - The returned string must be freed with `crisis_free_string`.
#[no_mangle]
pub unsafe extern "C" fn crisis_engine_deactivate(handle: *mut CrisisEngineHandle) -> *mut c_char {
    clear_last_error();

    let Some(engine) = engine_mut(handle) else {
        return ptr::null_mut();
    };
    let update = engine.deactivate();
    to_json_cstr(&update)
}

/// Reset to a new epoch. Same return convention as `crisis_engine_tick`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `crisis_engine_new`.
/// - The returned string must be freed with `crisis_free_string`.
#[no_mangle]
pub unsafe extern "C" fn crisis_engine_reset(handle: *mut CrisisEngineHandle) -> *mut c_char {
    clear_last_error();

    let Some(engine) = engine_mut(handle) else {
        return ptr::null_mut();
    };
    let update = engine.reset();
    to_json_cstr(&update)
}

/// Close the active crisis session with an outcome
/// (`resolved`, `escalated`, `transferred`, `ongoing`).
///
/// Returns 1 if a session was closed, 0 if none was active, -1 on error.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `crisis_engine_new`.
/// - `outcome` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn crisis_engine_report_outcome(
    handle: *mut CrisisEngineHandle,
    outcome: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(engine) = engine_mut(handle) else {
        return -1;
    };
    let outcome: SessionOutcome = match cstr_to_string(outcome).map(|s| s.parse()) {
        Some(Ok(outcome)) => outcome,
        Some(Err(e)) => {
            set_last_error(&e);
            return -1;
        }
        None => {
            set_last_error("Invalid outcome string pointer");
            return -1;
        }
    };

    c_int::from(engine.report_outcome(outcome))
}

/// Current engine snapshot as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `crisis_engine_new`.
/// - Returns a newly allocated string that must be freed with `crisis_free_string`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn crisis_engine_snapshot(handle: *mut CrisisEngineHandle) -> *mut c_char {
    clear_last_error();

    let Some(engine) = engine_mut(handle) else {
        return ptr::null_mut();
    };
    to_json_cstr(&engine.snapshot())
}

fn to_json_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a static string that is valid until the next Crisis Flux call.
/// - Do NOT free this pointer.
/// - Returns NULL if there was no error.
#[no_mangle]
pub unsafe extern "C" fn crisis_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Free a string returned by Crisis Flux functions.
///
/// # Safety
/// - `s` must be a pointer returned by a Crisis Flux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn crisis_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Get the Crisis Flux version string.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free this pointer.
#[no_mangle]
pub unsafe extern "C" fn crisis_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        crisis_free_string(ptr);
        s
    }

    #[test]
    fn test_engine_lifecycle() {
        unsafe {
            let engine = crisis_engine_new(ptr::null());
            assert!(!engine.is_null());

            let event = CString::new(r#"{"kind": "manual_rating", "value": 9}"#).unwrap();
            assert_eq!(crisis_engine_record_event(engine, event.as_ptr()), 1);

            let garbage = CString::new("nope").unwrap();
            assert_eq!(crisis_engine_record_event(engine, garbage.as_ptr()), 0);

            let update: serde_json::Value =
                serde_json::from_str(&take_string(crisis_engine_tick(engine))).unwrap();
            assert_eq!(update["level"], "emergency");

            let unchanged = take_string(crisis_engine_tick(engine));
            assert_eq!(unchanged, "null");

            let snapshot: serde_json::Value =
                serde_json::from_str(&take_string(crisis_engine_snapshot(engine))).unwrap();
            assert_eq!(snapshot["level"], "emergency");
            assert_eq!(snapshot["ticks"], 2);

            let outcome = CString::new("escalated").unwrap();
            assert_eq!(crisis_engine_report_outcome(engine, outcome.as_ptr()), 1);

            crisis_engine_free(engine);
        }
    }

    #[test]
    fn test_invalid_config_sets_error() {
        unsafe {
            let config = CString::new(r#"{"tick_interval_ms": 0}"#).unwrap();
            let engine = crisis_engine_new(config.as_ptr());
            assert!(engine.is_null());

            let err = crisis_last_error();
            assert!(!err.is_null());
            let msg = CStr::from_ptr(err).to_str().unwrap();
            assert!(msg.contains("tick_interval_ms"));
        }
    }

    #[test]
    fn test_null_handle() {
        unsafe {
            assert!(crisis_engine_tick(ptr::null_mut()).is_null());
            assert!(!crisis_last_error().is_null());
            assert_eq!(crisis_engine_record_event(ptr::null_mut(), ptr::null()), -1);
        }
    }

    #[test]
    fn test_bad_outcome() {
        unsafe {
            let engine = crisis_engine_new(ptr::null());
            let outcome = CString::new("vanished").unwrap();
            assert_eq!(crisis_engine_report_outcome(engine, outcome.as_ptr()), -1);
            crisis_engine_free(engine);
        }
    }

    #[test]
    fn test_version() {
        unsafe {
            let version = CStr::from_ptr(crisis_version()).to_str().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));
        }
    }
}
