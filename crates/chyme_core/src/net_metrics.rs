/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
pub struct NetMetrics {
    pub signaling_connected: AtomicBool,
    pub signaling_rx_bytes: AtomicU64,
    pub signaling_tx_bytes: AtomicU64,
    pub signaling_last_change_ms: AtomicU64,
    pub signaling_parse_errors: AtomicU64,
    pub signaling_reconnects: AtomicU64,
    signaling_last_error: Mutex<Option<String>>,

    pub peer_sessions: AtomicU64,
    pub peer_active: AtomicU64,
    pub peer_negotiation_failures: AtomicU64,
    pub ice_candidates_dropped: AtomicU64,
    pub remote_rx_packets: AtomicU64,
    pub remote_rx_bytes: AtomicU64,

    peer_seen: Mutex<HashMap<String, u64>>,
}

impl NetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_signaling_connected(&self, v: bool) {
        self.signaling_connected.store(v, Ordering::Relaxed);
        self.signaling_last_change_ms.store(now_ms(), Ordering::Relaxed);
        if v {
            let mut g = self.signaling_last_error.lock().unwrap_or_else(PoisonError::into_inner);
            *g = None;
        }
    }

    pub fn set_signaling_error(&self, err: String) {
        self.set_signaling_connected(false);
        let mut g = self.signaling_last_error.lock().unwrap_or_else(PoisonError::into_inner);
        *g = Some(err);
    }

    pub fn signaling_last_error(&self) -> Option<String> {
        self.signaling_last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn signaling_rx_add(&self, n: u64) {
        self.signaling_rx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn signaling_tx_add(&self, n: u64) {
        self.signaling_tx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn signaling_parse_error(&self) {
        self.signaling_parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signaling_reconnect(&self) {
        self.signaling_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_sessions_set(&self, n: u64) {
        self.peer_sessions.store(n, Ordering::Relaxed);
    }

    pub fn peer_seen(&self, peer_id: &str) {
        let mut g = self.peer_seen.lock().unwrap_or_else(PoisonError::into_inner);
        g.insert(peer_id.to_string(), now_ms());
        self.peer_active.store(g.len() as u64, Ordering::Relaxed);
    }

    pub fn peer_negotiation_failure(&self) {
        self.peer_negotiation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ice_candidate_dropped(&self) {
        self.ice_candidates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_rx_add(&self, bytes: u64) {
        self.remote_rx_packets.fetch_add(1, Ordering::Relaxed);
        self.remote_rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn prune_seen(&self, window_ms: u64) {
        let cutoff = now_ms().saturating_sub(window_ms);
        let mut g = self.peer_seen.lock().unwrap_or_else(PoisonError::into_inner);
        g.retain(|_, t| *t >= cutoff);
        self.peer_active.store(g.len() as u64, Ordering::Relaxed);
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        let last_error = self.signaling_last_error();
        self.prune_seen(60_000);
        serde_json::json!({
            "ts_ms": now_ms(),
            "signaling": {
                "connected": self.signaling_connected.load(Ordering::Relaxed),
                "rx_bytes": self.signaling_rx_bytes.load(Ordering::Relaxed),
                "tx_bytes": self.signaling_tx_bytes.load(Ordering::Relaxed),
                "last_change_ms": self.signaling_last_change_ms.load(Ordering::Relaxed),
                "parse_errors": self.signaling_parse_errors.load(Ordering::Relaxed),
                "reconnects": self.signaling_reconnects.load(Ordering::Relaxed),
                "last_error": last_error,
            },
            "peers": {
                "sessions": self.peer_sessions.load(Ordering::Relaxed),
                "active": self.peer_active.load(Ordering::Relaxed),
                "negotiation_failures": self.peer_negotiation_failures.load(Ordering::Relaxed),
                "ice_candidates_dropped": self.ice_candidates_dropped.load(Ordering::Relaxed),
                "rx_packets": self.remote_rx_packets.load(Ordering::Relaxed),
                "rx_bytes": self.remote_rx_bytes.load(Ordering::Relaxed),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_clears_last_error() {
        let m = NetMetrics::new();
        m.set_signaling_error("refused".to_string());
        assert_eq!(m.signaling_last_error().as_deref(), Some("refused"));
        assert!(!m.signaling_connected.load(Ordering::Relaxed));
        m.set_signaling_connected(true);
        assert_eq!(m.signaling_last_error(), None);
    }

    #[test]
    fn snapshot_reports_counters() {
        let m = NetMetrics::new();
        m.peer_seen("p1");
        m.peer_seen("p1");
        m.peer_seen("p2");
        m.remote_rx_add(120);
        m.remote_rx_add(80);
        let snap = m.snapshot_json();
        assert_eq!(snap["peers"]["active"], 2);
        assert_eq!(snap["peers"]["rx_packets"], 2);
        assert_eq!(snap["peers"]["rx_bytes"], 200);
    }
}
