/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::IceServerConfig;
use crate::local_media::LocalAudioStream;
use crate::peer_factory::{
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventSender, PeerLink, RemoteAudioStream, SdpKind,
    SessionDescription, SessionId,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chyme_protocol::IceCandidateInit;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn build_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn map_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        // Closed only follows our own close(); the session is already gone.
        RTCPeerConnectionState::Closed | RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    rtc.context("parse session description")
}

/// Peer connections on the `webrtc` crate: Opus through the default codecs,
/// max-bundle, RTCP mux required.
pub struct WebrtcPeerConnector {
    ice_servers: Vec<RTCIceServer>,
}

impl WebrtcPeerConnector {
    pub fn new(ice_servers: &[IceServerConfig]) -> Self {
        Self {
            ice_servers: build_ice_servers(ice_servers),
        }
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().context("register codecs")?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .context("register interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers: self.ice_servers.clone(),
                bundle_policy: RTCBundlePolicy::MaxBundle,
                rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
                ..Default::default()
            })
            .await
            .context("new peer connection")?;
        Ok(Arc::new(pc))
    }
}

#[async_trait]
impl PeerConnector for WebrtcPeerConnector {
    async fn create(
        &self,
        remote_peer_id: &str,
        session: SessionId,
        local: Option<&LocalAudioStream>,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        let pc = self.new_peer_connection().await?;

        match local {
            Some(stream) => {
                for track in stream.tracks() {
                    pc.add_track(track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
                        .await
                        .context("add local track")?;
                }
            }
            None => debug!(peer = %remote_peer_id, "receive-only peer connection"),
        }

        let peer_id = remote_peer_id.to_string();
        {
            let events = events.clone();
            let peer_id = peer_id.clone();
            pc.on_track(Box::new(
                move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                    let events = events.clone();
                    let peer_id = peer_id.clone();
                    Box::pin(async move {
                        if track.kind() != RTPCodecType::Audio {
                            debug!(peer = %peer_id, kind = %track.kind(), "ignoring non-audio track");
                            return;
                        }
                        info!(peer = %peer_id, track = %track.id(), "remote audio track");
                        let _ = events.send(PeerEvent::TrackReceived {
                            peer_id,
                            session,
                            stream: RemoteAudioStream::from_track(track),
                        });
                    })
                },
            ));
        }
        {
            let events = events.clone();
            let peer_id = peer_id.clone();
            pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                let events = events.clone();
                let peer_id = peer_id.clone();
                Box::pin(async move {
                    let Some(cand) = cand else { return };
                    match cand.to_json() {
                        Ok(init) => {
                            let _ = events.send(PeerEvent::IceCandidate {
                                peer_id,
                                session,
                                candidate: IceCandidateInit {
                                    candidate: init.candidate,
                                    sdp_m_line_index: init.sdp_mline_index,
                                    sdp_mid: init.sdp_mid,
                                },
                            });
                        }
                        Err(e) => warn!(peer = %peer_id, "serialize local candidate failed: {e}"),
                    }
                })
            }));
        }
        {
            let peer_id = peer_id.clone();
            pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                let events = events.clone();
                let peer_id = peer_id.clone();
                Box::pin(async move {
                    debug!(peer = %peer_id, state = %st, "peer connection state");
                    if let Some(state) = map_state(st) {
                        let _ = events.send(PeerEvent::StateChanged { peer_id, session, state });
                    }
                })
            }));
        }

        Ok(Arc::new(WebrtcPeerLink { pc, peer_id }))
    }
}

struct WebrtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    peer_id: String,
}

#[async_trait]
impl PeerLink for WebrtcPeerLink {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .context("set remote description")
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.context("create answer")?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .context("set local description")
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await
            .context("add ice candidate")
    }

    async fn close(&self) -> Result<()> {
        debug!(peer = %self.peer_id, "closing peer connection");
        self.pc.close().await.context("close peer connection")
    }
}
