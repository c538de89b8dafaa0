/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-peer session bookkeeping.
//!
//! The registry is the only owner of peer links and audio outputs: a link is
//! closed only by [`SessionRegistry::remove`] (or `clear`, which goes through
//! it) and an output is created only by [`SessionRegistry::attach_remote_stream`].

use crate::audio_output::{AudioOutput, AudioOutputFactory};
use crate::net_metrics::NetMetrics;
use crate::peer_factory::{PeerConnectionState, PeerLink, RemoteAudioStream, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PeerSession {
    remote_peer_id: String,
    session: SessionId,
    link: Arc<dyn PeerLink>,
    remote_stream: Option<RemoteAudioStream>,
    state: PeerConnectionState,
}

impl PeerSession {
    pub fn remote_peer_id(&self) -> &str {
        &self.remote_peer_id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn remote_stream(&self) -> Option<&RemoteAudioStream> {
        self.remote_stream.as_ref()
    }

    pub fn state(&self) -> PeerConnectionState {
        self.state
    }
}

pub struct SessionRegistry {
    sessions: HashMap<String, PeerSession>,
    outputs: HashMap<String, Box<dyn AudioOutput>>,
    output_factory: Arc<dyn AudioOutputFactory>,
    muted: bool,
    metrics: Arc<NetMetrics>,
}

impl SessionRegistry {
    pub fn new(output_factory: Arc<dyn AudioOutputFactory>, metrics: Arc<NetMetrics>) -> Self {
        Self {
            sessions: HashMap::new(),
            outputs: HashMap::new(),
            output_factory,
            muted: false,
            metrics,
        }
    }

    /// Stores the link for `peer_id` under `session`. A session already held
    /// for the same peer is removed first, closing its link.
    pub async fn upsert(&mut self, peer_id: &str, session: SessionId, link: Arc<dyn PeerLink>) {
        if self.sessions.contains_key(peer_id) {
            debug!(peer = %peer_id, "replacing existing session");
            self.remove(peer_id).await;
        }
        self.sessions.insert(
            peer_id.to_string(),
            PeerSession {
                remote_peer_id: peer_id.to_string(),
                session,
                link,
                remote_stream: None,
                state: PeerConnectionState::Connecting,
            },
        );
        self.metrics.peer_sessions_set(self.sessions.len() as u64);
    }

    /// Binds `stream` to the peer's audio output and starts playback.
    /// Returns false (and does nothing) for peers without a session.
    pub fn attach_remote_stream(&mut self, peer_id: &str, stream: RemoteAudioStream) -> bool {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            debug!(peer = %peer_id, "remote stream for unknown peer ignored");
            return false;
        };
        session.remote_stream = Some(stream.clone());

        let factory = &self.output_factory;
        let output = self
            .outputs
            .entry(peer_id.to_string())
            .or_insert_with(|| factory.create(peer_id));
        output.bind(stream);
        output.set_muted(self.muted);
        output.play();
        info!(peer = %peer_id, muted = self.muted, "remote audio attached");
        true
    }

    /// Closes and forgets everything held for `peer_id`. Returns whether
    /// anything was held.
    pub async fn remove(&mut self, peer_id: &str) -> bool {
        let session = self.sessions.remove(peer_id);
        let output = self.outputs.remove(peer_id);
        let existed = session.is_some() || output.is_some();

        if let Some(session) = session {
            if let Err(e) = session.link.close().await {
                warn!(peer = %peer_id, "close peer connection failed: {e:#}");
            }
        }
        if let Some(mut output) = output {
            output.pause();
            output.detach();
        }
        if existed {
            debug!(peer = %peer_id, "session removed");
            self.metrics.peer_sessions_set(self.sessions.len() as u64);
        }
        existed
    }

    pub async fn clear(&mut self) {
        let mut ids = self.sessions.keys().cloned().collect::<Vec<_>>();
        ids.extend(self.outputs.keys().filter(|id| !self.sessions.contains_key(*id)).cloned());
        for id in ids {
            self.remove(&id).await;
        }
    }

    /// Applies the flag to every existing output and to outputs created later.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        for output in self.outputs.values_mut() {
            output.set_muted(muted);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Records the last observed state. Returns false for unknown peers.
    pub fn set_state(&mut self, peer_id: &str, state: PeerConnectionState) -> bool {
        match self.sessions.get_mut(peer_id) {
            Some(session) => {
                session.state = state;
                true
            }
            None => false,
        }
    }

    /// Whether `session` is the live link of `peer_id`.
    pub fn is_current(&self, peer_id: &str, session: SessionId) -> bool {
        self.sessions.get(peer_id).is_some_and(|s| s.session == session)
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerSession> {
        self.sessions.get(peer_id)
    }

    pub fn link(&self, peer_id: &str) -> Option<Arc<dyn PeerLink>> {
        self.sessions.get(peer_id).map(|s| s.link.clone())
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.sessions.contains_key(peer_id)
    }

    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids = self.sessions.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output_muted(&self, peer_id: &str) -> Option<bool> {
        self.outputs.get(peer_id).map(|o| o.is_muted())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for (_, mut output) in self.outputs.drain() {
            output.pause();
            output.detach();
        }
        if self.sessions.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(sessions = self.sessions.len(), "registry dropped outside a runtime; links not closed");
            return;
        };
        for (peer_id, session) in self.sessions.drain() {
            handle.spawn(async move {
                if let Err(e) = session.link.close().await {
                    debug!(peer = %peer_id, "close on drop failed: {e:#}");
                }
            });
        }
        self.metrics.peer_sessions_set(0);
    }
}
