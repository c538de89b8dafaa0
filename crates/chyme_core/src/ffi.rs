/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::load_config;
use crate::runtime;
use std::ffi::{c_char, c_int, CStr, CString};

fn set_err(out_err: *mut *mut c_char, msg: String) {
    if out_err.is_null() {
        return;
    }
    let c = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    unsafe {
        *out_err = c.into_raw();
    }
}

fn to_cstring(text: String) -> *mut c_char {
    match CString::new(text) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Joins a room described by `config_json` on a background thread.
/// Returns 0 and writes the handle on success.
#[no_mangle]
pub extern "C" fn chyme_core_start(config_json: *const c_char, out_handle: *mut u64, out_err: *mut *mut c_char) -> c_int {
    if config_json.is_null() || out_handle.is_null() {
        set_err(out_err, "null argument".to_string());
        return 1;
    }
    let cfg_str = unsafe { CStr::from_ptr(config_json) }.to_string_lossy().to_string();
    let cfg = match load_config(&cfg_str) {
        Ok(v) => v,
        Err(e) => {
            set_err(out_err, format!("invalid config json: {e:#}"));
            return 2;
        }
    };
    match runtime::start(cfg) {
        Ok(handle) => {
            unsafe {
                *out_handle = handle;
            }
            0
        }
        Err(e) => {
            set_err(out_err, format!("{e:#}"));
            3
        }
    }
}

#[no_mangle]
pub extern "C" fn chyme_core_stop(handle: u64, out_err: *mut *mut c_char) -> c_int {
    match runtime::stop(handle) {
        Ok(()) => 0,
        Err(e) => {
            set_err(out_err, format!("{e:#}"));
            1
        }
    }
}

#[no_mangle]
pub extern "C" fn chyme_core_toggle_mute(handle: u64, out_err: *mut *mut c_char) -> c_int {
    match runtime::toggle_mute(handle) {
        Ok(()) => 0,
        Err(e) => {
            set_err(out_err, format!("{e:#}"));
            1
        }
    }
}

/// JSON status of a running room; free with `chyme_core_free_cstring`.
#[no_mangle]
pub extern "C" fn chyme_core_status_json(handle: u64) -> *mut c_char {
    match runtime::status_json(handle) {
        Ok(v) => to_cstring(v.to_string()),
        Err(_) => std::ptr::null_mut(),
    }
}

/// JSON array of up to `max` pending room events, oldest first.
#[no_mangle]
pub extern "C" fn chyme_core_poll_events(handle: u64, max: u32) -> *mut c_char {
    let events = match runtime::drain_events(handle, max as usize) {
        Ok(v) => v,
        Err(_) => return std::ptr::null_mut(),
    };
    match serde_json::to_string(&events) {
        Ok(text) => to_cstring(text),
        Err(_) => std::ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn chyme_core_free_cstring(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_config_reports_error_string() {
        let cfg = CString::new(r#"{"room_id":"r1"}"#).unwrap();
        let mut handle = 0u64;
        let mut err: *mut c_char = std::ptr::null_mut();
        let rc = chyme_core_start(cfg.as_ptr(), &mut handle, &mut err);
        assert_eq!(rc, 2);
        assert!(!err.is_null());
        let msg = unsafe { CStr::from_ptr(err) }.to_string_lossy().to_string();
        assert!(msg.contains("invalid config json"));
        chyme_core_free_cstring(err);
    }

    #[test]
    fn unknown_handle_yields_null_status() {
        assert!(chyme_core_status_json(u64::MAX).is_null());
        assert!(chyme_core_poll_events(u64::MAX, 8).is_null());
        assert_eq!(chyme_core_stop(u64::MAX, std::ptr::null_mut()), 1);
    }
}
