/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::backoff::ReconnectPolicy;
use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_STUN_URLS: [&str; 2] = ["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"];
pub const DEFAULT_PEER_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_SPEAKING_THRESHOLD: f32 = 30.0;
/// Roughly one display refresh.
pub const DEFAULT_SPEAKING_INTERVAL_MS: u64 = 16;

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct SignalingConfig {
    /// Re-dial after an unexpected close. Off unless set.
    pub reconnect: Option<bool>,
    pub max_reconnect_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl SignalingConfig {
    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        if !self.reconnect.unwrap_or(false) {
            return None;
        }
        let defaults = ReconnectPolicy::default();
        let initial = self
            .initial_backoff_ms
            .map(|v| Duration::from_millis(v.clamp(100, 10_000)))
            .unwrap_or(defaults.initial_backoff);
        let max = self
            .max_backoff_ms
            .map(|v| Duration::from_millis(v.clamp(1_000, 300_000)))
            .unwrap_or(defaults.max_backoff)
            .max(initial);
        Some(ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts.unwrap_or(defaults.max_attempts).clamp(1, 100),
            initial_backoff: initial,
            max_backoff: max,
        })
    }
}

/// Settings of one room connection.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct RoomAudioConfig {
    pub room_id: String,
    /// http(s) or ws(s) URL of the signaling endpoint; the scheme is upgraded to ws(s).
    pub signaling_endpoint: String,
    /// Absent for anonymous listeners in public rooms.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Sent as a diagnostic query parameter and as the sender of outbound envelopes.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Join without a local capture stream.
    #[serde(default)]
    pub listen_only: Option<bool>,
    #[serde(default)]
    pub ice_servers: Option<Vec<IceServerConfig>>,
    /// Delay before lost peers are dropped.
    #[serde(default)]
    pub reconnect_delay_ms: Option<u64>,
    /// Average byte-frequency energy above which the local user counts as speaking.
    #[serde(default)]
    pub speaking_threshold: Option<f32>,
    #[serde(default)]
    pub speaking_interval_ms: Option<u64>,
    #[serde(default)]
    pub signaling: Option<SignalingConfig>,
}

impl RoomAudioConfig {
    pub fn new(room_id: &str, signaling_endpoint: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            signaling_endpoint: signaling_endpoint.to_string(),
            auth_token: None,
            user_id: None,
            listen_only: None,
            ice_servers: None,
            reconnect_delay_ms: None,
            speaking_threshold: None,
            speaking_interval_ms: None,
            signaling: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            anyhow::bail!("room_id is required");
        }
        if self.signaling_endpoint.trim().is_empty() {
            anyhow::bail!("signaling_endpoint is required");
        }
        Ok(())
    }

    pub fn listen_only(&self) -> bool {
        self.listen_only.unwrap_or(false)
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        let configured = self
            .ice_servers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.urls.iter().any(|u| !u.trim().is_empty()))
            .collect::<Vec<_>>();
        if !configured.is_empty() {
            return configured;
        }
        DEFAULT_STUN_URLS
            .iter()
            .map(|u| IceServerConfig {
                urls: vec![u.to_string()],
                ..Default::default()
            })
            .collect()
    }

    pub fn peer_reconnect_delay(&self) -> Duration {
        Duration::from_millis(
            self.reconnect_delay_ms
                .unwrap_or(DEFAULT_PEER_RECONNECT_DELAY_MS)
                .clamp(250, 60_000),
        )
    }

    pub fn speaking_threshold(&self) -> f32 {
        self.speaking_threshold
            .filter(|v| v.is_finite())
            .unwrap_or(DEFAULT_SPEAKING_THRESHOLD)
            .clamp(0.0, 255.0)
    }

    pub fn speaking_interval(&self) -> Duration {
        Duration::from_millis(
            self.speaking_interval_ms
                .unwrap_or(DEFAULT_SPEAKING_INTERVAL_MS)
                .clamp(8, 1_000),
        )
    }

    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        self.signaling.as_ref().and_then(SignalingConfig::reconnect_policy)
    }
}

pub fn load_config(text: &str) -> Result<RoomAudioConfig> {
    let cfg: RoomAudioConfig = serde_json::from_str(text).context("decode RoomAudioConfig")?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = load_config(r#"{"room_id":"r1","signaling_endpoint":"https://signal.example/ws"}"#).unwrap();
        assert!(!cfg.listen_only());
        assert_eq!(cfg.auth_token(), None);
        assert_eq!(cfg.peer_reconnect_delay(), Duration::from_secs(3));
        assert_eq!(cfg.speaking_threshold(), 30.0);
        assert!(cfg.reconnect_policy().is_none());
        let urls = cfg.ice_servers().into_iter().flat_map(|s| s.urls).collect::<Vec<_>>();
        assert_eq!(urls, DEFAULT_STUN_URLS.map(String::from).to_vec());
    }

    #[test]
    fn blank_token_counts_as_anonymous() {
        let mut cfg = RoomAudioConfig::new("r1", "https://signal.example/ws");
        cfg.auth_token = Some("   ".to_string());
        assert_eq!(cfg.auth_token(), None);
    }

    #[test]
    fn values_are_clamped() {
        let cfg = load_config(
            r#"{"room_id":"r1","signaling_endpoint":"wss://s/ws","reconnect_delay_ms":1,
                "speaking_threshold":900,"speaking_interval_ms":0,
                "signaling":{"reconnect":true,"max_reconnect_attempts":0,"max_backoff_ms":5}}"#,
        )
        .unwrap();
        assert_eq!(cfg.peer_reconnect_delay(), Duration::from_millis(250));
        assert_eq!(cfg.speaking_threshold(), 255.0);
        assert_eq!(cfg.speaking_interval(), Duration::from_millis(8));
        let policy = cfg.reconnect_policy().unwrap();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(1));
    }

    #[test]
    fn missing_room_is_rejected() {
        assert!(load_config(r#"{"room_id":" ","signaling_endpoint":"wss://s/ws"}"#).is_err());
        assert!(load_config(r#"{"room_id":"r1"}"#).is_err());
    }
}
