/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

/// Failure to obtain or run the local capture device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no capture device available: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

/// Failure of the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    #[error("invalid signaling endpoint: {0}")]
    InvalidEndpoint(String),
    /// The server answered the upgrade with an HTTP error status.
    #[error("HTTP {status}: signaling upgrade rejected")]
    Rejected { status: u16 },
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("signaling channel is not open")]
    NotOpen,
    #[error("encode signaling message: {0}")]
    Encode(String),
    #[error("signaling channel closed: {0}")]
    Closed(String),
    #[error("signaling reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Errors surfaced to the UI layer. Per-peer negotiation failures never
/// end up here; they are logged and contained to the peer's session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomAudioError {
    #[error("microphone access required: {0}")]
    Acquisition(#[from] MediaError),
    #[error("connection error, please refresh the page: {0}")]
    Signaling(#[from] SignalingError),
}

impl RoomAudioError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Acquisition(_) => "acquisition",
            Self::Signaling(_) => "signaling",
        }
    }
}
