/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::room_audio::RoomState;
use chyme_protocol::ChatEnvelope;
use serde::Serialize;

fn now_ms_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// What the room controller reports to the UI layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RoomEventKind {
    StateChanged { state: RoomState },
    /// A user-facing failure (acquisition or signaling).
    Error { error_kind: String, message: String },
    MuteChanged { muted: bool },
    SpeakingChanged { speaking: bool },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    PeerConnectionLost { peer_id: String },
    ChatMessage(ChatEnvelope),
    SignalingReconnecting { attempt: u32 },
    SignalingReopened,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoomEvent {
    pub ts_ms: u64,
    pub room_id: String,
    #[serde(flatten)]
    pub kind: RoomEventKind,
}

impl RoomEvent {
    pub fn new(room_id: &str, kind: RoomEventKind) -> Self {
        Self {
            ts_ms: now_ms_u64(),
            room_id: room_id.to_string(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat_with_kind_tag() {
        let ev = RoomEvent::new("r1", RoomEventKind::PeerJoined { peer_id: "p1".to_string() });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "peer-joined");
        assert_eq!(v["peer_id"], "p1");
        assert_eq!(v["room_id"], "r1");
        assert!(v["ts_ms"].as_u64().unwrap() > 0);

        let v = serde_json::to_value(RoomEvent::new(
            "r1",
            RoomEventKind::StateChanged { state: RoomState::Connected },
        ))
        .unwrap();
        assert_eq!(v["kind"], "state-changed");
        assert_eq!(v["state"], "connected");
    }
}
