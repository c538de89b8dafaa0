/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Seam between the controller and the WebRTC stack.
//!
//! A [`PeerConnector`] builds one [`PeerLink`] per remote peer and reports
//! everything the link observes as [`PeerEvent`]s on the channel it was given.

use crate::local_media::LocalAudioStream;
use anyhow::Result;
use async_trait::async_trait;
use chyme_protocol::IceCandidateInit;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_remote::TrackRemote;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl PeerConnectionState {
    /// States that arm the reconnection timer.
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: String) -> Self {
        Self { kind: SdpKind::Offer, sdp }
    }

    pub fn answer(sdp: String) -> Self {
        Self { kind: SdpKind::Answer, sdp }
    }
}

/// Inbound media of one remote peer.
#[derive(Clone)]
pub struct RemoteAudioStream {
    stream_id: String,
    track_id: String,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteAudioStream {
    pub fn from_track(track: Arc<TrackRemote>) -> Self {
        Self {
            stream_id: track.stream_id(),
            track_id: track.id(),
            track: Some(track),
        }
    }

    /// A stream with no RTP source behind it.
    pub fn detached(stream_id: &str, track_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            track_id: track_id.to_string(),
            track: None,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn track(&self) -> Option<&Arc<TrackRemote>> {
        self.track.as_ref()
    }
}

impl fmt::Debug for RemoteAudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAudioStream")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .field("has_track", &self.track.is_some())
            .finish()
    }
}

/// Identifies one link. A re-offer from the same peer gets a new id, so
/// callbacks still queued from the replaced link can be told apart.
pub type SessionId = u64;

#[derive(Debug)]
pub enum PeerEvent {
    TrackReceived {
        peer_id: String,
        session: SessionId,
        stream: RemoteAudioStream,
    },
    /// Gathered local candidate; end-of-candidates is never reported.
    IceCandidate {
        peer_id: String,
        session: SessionId,
        candidate: IceCandidateInit,
    },
    StateChanged {
        peer_id: String,
        session: SessionId,
        state: PeerConnectionState,
    },
}

impl PeerEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            Self::TrackReceived { peer_id, .. }
            | Self::IceCandidate { peer_id, .. }
            | Self::StateChanged { peer_id, .. } => peer_id,
        }
    }

    pub fn session(&self) -> SessionId {
        match self {
            Self::TrackReceived { session, .. }
            | Self::IceCandidate { session, .. }
            | Self::StateChanged { session, .. } => *session,
        }
    }
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Creates the link for `remote_peer_id`, sending local tracks when
    /// `local` is present and receiving only otherwise. Every event the link
    /// reports carries `session`.
    async fn create(
        &self,
        remote_peer_id: &str,
        session: SessionId,
        local: Option<&LocalAudioStream>,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_states_arm_reconnect() {
        assert!(PeerConnectionState::Failed.is_lost());
        assert!(PeerConnectionState::Disconnected.is_lost());
        assert!(!PeerConnectionState::Connected.is_lost());
        assert!(!PeerConnectionState::Connecting.is_lost());
    }

    #[test]
    fn detached_stream_has_no_track() {
        let stream = RemoteAudioStream::detached("s1", "t1");
        assert_eq!(stream.stream_id(), "s1");
        assert!(stream.track().is_none());
        assert!(format!("{stream:?}").contains("has_track: false"));
    }

    #[test]
    fn events_expose_peer_and_session() {
        let ev = PeerEvent::StateChanged {
            peer_id: "p1".to_string(),
            session: 7,
            state: PeerConnectionState::Connected,
        };
        assert_eq!(ev.peer_id(), "p1");
        assert_eq!(ev.session(), 7);
    }
}
