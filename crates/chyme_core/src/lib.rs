/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::ffi::{c_char, CString};

pub mod analyser;
pub mod audio_output;
pub mod backoff;
pub mod config;
pub mod error;
mod ffi;
pub mod local_media;
pub mod net_metrics;
pub mod peer_factory;
pub mod room_audio;
pub mod room_events;
pub mod runtime;
pub mod session_registry;
pub mod signaling;
pub mod speaking;
#[cfg(test)]
mod testing;
pub mod webrtc_peer;
pub mod ws_dialer;

pub use config::{load_config, RoomAudioConfig};
pub use error::{MediaError, RoomAudioError, SignalingError};
pub use room_audio::{RoomAudioController, RoomAudioDeps, RoomState};
pub use room_events::{RoomEvent, RoomEventKind};

#[no_mangle]
pub extern "C" fn chyme_core_version() -> *mut c_char {
    match CString::new(env!("CARGO_PKG_VERSION")) {
        Ok(v) => v.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}
