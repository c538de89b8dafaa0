/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

/// Envelope exchanged over the room signaling channel, keyed by `type`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Offer(SdpEnvelope),
    Answer(SdpEnvelope),
    IceCandidate(CandidateEnvelope),
    ChatMessage(ChatEnvelope),
    /// Any `type` this client does not handle.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SdpEnvelope {
    pub room_id: String,
    #[serde(default, alias = "from", skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
    pub sdp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEnvelope {
    pub room_id: String,
    #[serde(default, alias = "from", skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
    pub candidate: IceCandidateInit,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    #[serde(default)]
    pub id: String,
    pub room_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_true")]
    pub is_anonymous: bool,
    #[serde(default)]
    pub created_at: String,
}

fn default_true() -> bool {
    true
}

impl SignalingMessage {
    pub fn offer(room_id: &str, from_user_id: &str, sdp: String) -> Self {
        Self::Offer(SdpEnvelope {
            room_id: room_id.to_string(),
            from_user_id: Some(from_user_id.to_string()),
            to_user_id: None,
            sdp,
        })
    }

    pub fn answer(room_id: &str, to_user_id: &str, from_user_id: Option<&str>, sdp: String) -> Self {
        Self::Answer(SdpEnvelope {
            room_id: room_id.to_string(),
            from_user_id: from_user_id.map(str::to_string),
            to_user_id: Some(to_user_id.to_string()),
            sdp,
        })
    }

    pub fn ice_candidate(
        room_id: &str,
        to_user_id: &str,
        from_user_id: Option<&str>,
        candidate: IceCandidateInit,
    ) -> Self {
        Self::IceCandidate(CandidateEnvelope {
            room_id: room_id.to_string(),
            from_user_id: from_user_id.map(str::to_string),
            to_user_id: Some(to_user_id.to_string()),
            candidate,
        })
    }

    /// Wire name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::ChatMessage(_) => "chat-message",
            Self::Unknown => "unknown",
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::Offer(m) | Self::Answer(m) => Some(&m.room_id),
            Self::IceCandidate(m) => Some(&m.room_id),
            Self::ChatMessage(m) => Some(&m.room_id),
            Self::Unknown => None,
        }
    }

    /// Sender of the message, if the envelope names one.
    pub fn from_user_id(&self) -> Option<&str> {
        match self {
            Self::Offer(m) | Self::Answer(m) => m.from_user_id.as_deref(),
            Self::IceCandidate(m) => m.from_user_id.as_deref(),
            Self::ChatMessage(m) => Some(m.user_id.as_str()).filter(|s| !s.is_empty()),
            Self::Unknown => None,
        }
    }

    pub fn to_user_id(&self) -> Option<&str> {
        match self {
            Self::Offer(m) | Self::Answer(m) => m.to_user_id.as_deref(),
            Self::IceCandidate(m) => m.to_user_id.as_deref(),
            Self::ChatMessage(_) | Self::Unknown => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offer_with_legacy_from_field() {
        let text = r#"{"type":"offer","roomId":"r1","from":"speaker-1","sdp":"v=0"}"#;
        let msg = SignalingMessage::from_json(text).unwrap();
        assert_eq!(msg.kind(), "offer");
        assert_eq!(msg.room_id(), Some("r1"));
        assert_eq!(msg.from_user_id(), Some("speaker-1"));
        assert_eq!(msg.to_user_id(), None);
    }

    #[test]
    fn outbound_candidate_uses_browser_field_names() {
        let msg = SignalingMessage::ice_candidate(
            "r1",
            "speaker-1",
            None,
            IceCandidateInit {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string(),
                sdp_m_line_index: Some(0),
                sdp_mid: Some("0".to_string()),
            },
        );
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "ice-candidate");
        assert_eq!(v["roomId"], "r1");
        assert_eq!(v["toUserId"], "speaker-1");
        assert!(v.get("fromUserId").is_none());
        assert_eq!(v["candidate"]["sdpMLineIndex"], 0);
        assert_eq!(v["candidate"]["sdpMid"], "0");
    }

    #[test]
    fn serialized_answer_parses_back_to_same_tuple() {
        let sent = SignalingMessage::answer("r1", "speaker-1", Some("listener-9"), "v=0\r\n".to_string());
        let received = SignalingMessage::from_json(&sent.to_json().unwrap()).unwrap();
        assert_eq!(received, sent);
        assert_eq!(
            (received.kind(), received.room_id(), received.from_user_id(), received.to_user_id()),
            ("answer", Some("r1"), Some("listener-9"), Some("speaker-1"))
        );
    }

    #[test]
    fn serialized_offer_parses_back() {
        let sent = SignalingMessage::offer("r1", "speaker-1", "v=0\r\n".to_string());
        let json = sent.to_json().unwrap();
        assert!(json.contains(r#""type":"offer""#));
        assert!(json.contains(r#""fromUserId":"speaker-1""#));
        assert!(!json.contains("toUserId"));
        let received = SignalingMessage::from_json(&json).unwrap();
        assert_eq!(received, sent);
        assert_eq!(
            (received.kind(), received.room_id(), received.from_user_id(), received.to_user_id()),
            ("offer", Some("r1"), Some("speaker-1"), None)
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let msg = SignalingMessage::from_json(r#"{"type":"hand-raise","roomId":"r1"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Unknown);
        assert_eq!(msg.room_id(), None);
    }

    #[test]
    fn chat_message_defaults_to_anonymous() {
        let text = r#"{"type":"chat-message","roomId":"r1","userId":"u2","content":"hi"}"#;
        let SignalingMessage::ChatMessage(chat) = SignalingMessage::from_json(text).unwrap() else {
            panic!("expected chat message");
        };
        assert!(chat.is_anonymous);
        assert_eq!(chat.content, "hi");
        assert_eq!(chat.id, "");
    }

    #[test]
    fn missing_sdp_is_rejected() {
        assert!(SignalingMessage::from_json(r#"{"type":"offer","roomId":"r1"}"#).is_err());
    }
}
