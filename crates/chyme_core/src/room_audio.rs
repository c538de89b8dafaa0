/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Room audio controller.
//!
//! Owns the signaling client, the local capture stream and the session
//! registry of one room connection. The owner drives it: `connect()`,
//! `disconnect()` and `toggle_mute()` are called directly, and
//! `next_event()` is awaited in a loop to process signaling traffic, peer
//! callbacks and the reconnection timer one at a time.

use crate::audio_output::{AudioOutputFactory, DiscardSink, RtpPlaybackFactory};
use crate::config::RoomAudioConfig;
use crate::error::RoomAudioError;
use crate::local_media::{CaptureDevice, LocalMediaManager};
use crate::net_metrics::NetMetrics;
use crate::peer_factory::{
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventSender, PeerLink, SessionDescription, SessionId,
};
use crate::room_events::{RoomEvent, RoomEventKind};
use crate::session_registry::SessionRegistry;
use crate::signaling::{Dialer, SignalingClient, SignalingEvent, SignalingState, SignalingTarget};
use crate::speaking::SpeakingMonitor;
use crate::webrtc_peer::WebrtcPeerConnector;
use crate::ws_dialer::WsDialer;
use anyhow::Context;
use chyme_protocol::{IceCandidateInit, SignalingMessage};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Collaborators of a controller. Production hosts use [`RoomAudioDeps::native`].
pub struct RoomAudioDeps {
    pub dialer: Arc<dyn Dialer>,
    pub capture: Arc<dyn CaptureDevice>,
    pub connector: Arc<dyn PeerConnector>,
    pub outputs: Arc<dyn AudioOutputFactory>,
    pub metrics: Arc<NetMetrics>,
}

impl RoomAudioDeps {
    pub fn native(cfg: &RoomAudioConfig, capture: Arc<dyn CaptureDevice>, metrics: Arc<NetMetrics>) -> Self {
        Self {
            dialer: Arc::new(WsDialer),
            capture,
            connector: Arc::new(WebrtcPeerConnector::new(&cfg.ice_servers())),
            outputs: Arc::new(RtpPlaybackFactory::new(metrics.clone(), Arc::new(DiscardSink))),
            metrics,
        }
    }
}

/// Single timer shared by every peer whose connection dropped. Each loss
/// re-arms it; when it fires, the peers still pending are handed back.
struct ReconnectTimer {
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    pending: HashSet<String>,
}

impl ReconnectTimer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            sleep: None,
            pending: HashSet::new(),
        }
    }

    fn arm(&mut self, peer_id: &str) {
        self.pending.insert(peer_id.to_string());
        self.sleep = Some(Box::pin(tokio::time::sleep(self.delay)));
    }

    fn recovered(&mut self, peer_id: &str) {
        self.pending.remove(peer_id);
        if self.pending.is_empty() {
            self.sleep = None;
        }
    }

    fn cancel(&mut self) {
        self.sleep = None;
        self.pending.clear();
    }

    fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    async fn fired(&mut self) -> Vec<String> {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
                self.pending.drain().collect()
            }
            None => std::future::pending().await,
        }
    }
}

/// One unit of work for [`RoomAudioController::handle_input`].
pub struct RoomInput(Input);

enum Input {
    Signaling(SignalingEvent),
    Peer(PeerEvent),
    Deadline(Vec<String>),
}

pub struct RoomAudioController {
    cfg: RoomAudioConfig,
    state: RoomState,
    state_tx: watch::Sender<RoomState>,
    muted: bool,
    signaling: SignalingClient,
    signal_rx: mpsc::UnboundedReceiver<SignalingEvent>,
    registry: SessionRegistry,
    media: LocalMediaManager,
    connector: Arc<dyn PeerConnector>,
    peer_tx: PeerEventSender,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    next_session: SessionId,
    speaking: SpeakingMonitor,
    reconnect: ReconnectTimer,
    events: broadcast::Sender<RoomEvent>,
    metrics: Arc<NetMetrics>,
}

impl RoomAudioController {
    pub fn new(cfg: RoomAudioConfig, deps: RoomAudioDeps) -> Self {
        let (signaling, signal_rx) =
            SignalingClient::new(deps.dialer, cfg.reconnect_policy(), deps.metrics.clone());
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(RoomState::Disconnected);
        let speaking = SpeakingMonitor::new(
            &cfg.room_id,
            cfg.speaking_threshold(),
            cfg.speaking_interval(),
            events.clone(),
        );
        Self {
            reconnect: ReconnectTimer::new(cfg.peer_reconnect_delay()),
            state: RoomState::Disconnected,
            state_tx,
            muted: false,
            signaling,
            signal_rx,
            registry: SessionRegistry::new(deps.outputs, deps.metrics.clone()),
            media: LocalMediaManager::new(deps.capture),
            connector: deps.connector,
            peer_tx,
            peer_rx,
            next_session: 0,
            speaking,
            events,
            metrics: deps.metrics,
            cfg,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.cfg.room_id
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn watch_state(&self) -> watch::Receiver<RoomState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state == RoomState::Connected
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_speaking()
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling.state()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn local_media(&self) -> &LocalMediaManager {
        &self.media
    }

    pub fn metrics(&self) -> &Arc<NetMetrics> {
        &self.metrics
    }

    /// Acquires the microphone (unless listen-only), then opens signaling.
    /// Either failure leaves the room `Failed` with nothing held and
    /// publishes exactly one error event.
    pub async fn connect(&mut self) -> Result<(), RoomAudioError> {
        if matches!(self.state, RoomState::Connecting | RoomState::Connected) {
            debug!(room = %self.cfg.room_id, "connect ignored, already {:?}", self.state);
            return Ok(());
        }
        self.set_state(RoomState::Connecting);

        if self.cfg.listen_only() {
            info!(room = %self.cfg.room_id, "joining as listener, no local capture");
        } else {
            let acquired = self.media.acquire().await.map(|_| ());
            if let Err(e) = acquired {
                self.media.release();
                return Err(self.fail(e.into()));
            }
        }

        let target = SignalingTarget::from_config(&self.cfg);
        if let Err(e) = self.signaling.connect(&target).await {
            self.media.release();
            return Err(self.fail(e.into()));
        }

        self.set_state(RoomState::Connected);
        self.sync_speaking();
        Ok(())
    }

    /// Tears everything down. Safe in any state and when repeated.
    pub async fn disconnect(&mut self) {
        self.signaling.close();
        self.release_room().await;
        while self.signal_rx.try_recv().is_ok() {}
        while self.peer_rx.try_recv().is_ok() {}
        if self.muted {
            self.apply_mute(false);
        }
        self.set_state(RoomState::Disconnected);
    }

    /// Flips local and remote mute together. Returns the new flag.
    pub fn toggle_mute(&mut self) -> bool {
        self.apply_mute(!self.muted);
        self.muted
    }

    /// Waits for and handles the next signaling message, peer callback or
    /// reconnection deadline.
    pub async fn next_event(&mut self) {
        let input = self.recv_input().await;
        self.handle_input(input).await;
    }

    /// Waits for the next input without acting on it. Cancel safe, so it can
    /// sit in a `select!` next to other work; pass the result to
    /// [`Self::handle_input`].
    pub async fn recv_input(&mut self) -> RoomInput {
        let input = tokio::select! {
            Some(ev) = self.signal_rx.recv() => Input::Signaling(ev),
            Some(ev) = self.peer_rx.recv() => Input::Peer(ev),
            lost = self.reconnect.fired() => Input::Deadline(lost),
        };
        RoomInput(input)
    }

    pub async fn handle_input(&mut self, input: RoomInput) {
        match input.0 {
            Input::Signaling(ev) => self.on_signaling_event(ev).await,
            Input::Peer(ev) => self.on_peer_event(ev).await,
            Input::Deadline(lost) => self.on_reconnect_deadline(lost).await,
        }
    }

    fn apply_mute(&mut self, muted: bool) {
        self.muted = muted;
        self.media.set_muted(muted);
        self.registry.set_muted(muted);
        info!(room = %self.cfg.room_id, muted, "mute changed");
        self.publish(RoomEventKind::MuteChanged { muted });
        self.sync_speaking();
    }

    fn sync_speaking(&mut self) {
        let track = self.media.stream().and_then(|s| s.first_track());
        match track {
            Some(track) if self.state == RoomState::Connected && !self.muted => {
                self.speaking.start(track.subscribe_pcm());
            }
            _ => self.speaking.stop(),
        }
    }

    async fn release_room(&mut self) {
        self.speaking.stop();
        self.reconnect.cancel();
        self.registry.clear().await;
        self.media.release();
    }

    fn fail(&mut self, err: RoomAudioError) -> RoomAudioError {
        error!(room = %self.cfg.room_id, kind = err.kind(), "{err}");
        self.publish(RoomEventKind::Error {
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        });
        self.set_state(RoomState::Failed);
        err
    }

    fn set_state(&mut self, state: RoomState) {
        if self.state == state {
            return;
        }
        debug!(room = %self.cfg.room_id, from = ?self.state, to = ?state, "room state");
        self.state = state;
        self.state_tx.send_replace(state);
        self.publish(RoomEventKind::StateChanged { state });
    }

    fn publish(&self, kind: RoomEventKind) {
        let _ = self.events.send(RoomEvent::new(&self.cfg.room_id, kind));
    }

    async fn on_signaling_event(&mut self, ev: SignalingEvent) {
        if matches!(self.state, RoomState::Disconnected | RoomState::Failed) {
            debug!(room = %self.cfg.room_id, "stale signaling event ignored");
            return;
        }
        match ev {
            SignalingEvent::Message(msg) => self.on_message(msg).await,
            SignalingEvent::Closed { reason, will_reconnect } => {
                info!(room = %self.cfg.room_id, %reason, will_reconnect, "signaling closed");
                self.speaking.stop();
                self.reconnect.cancel();
                self.registry.clear().await;
                if will_reconnect {
                    self.set_state(RoomState::Connecting);
                } else {
                    self.media.release();
                    if self.muted {
                        self.apply_mute(false);
                    }
                    self.set_state(RoomState::Disconnected);
                }
            }
            SignalingEvent::Reconnecting { attempt } => {
                self.publish(RoomEventKind::SignalingReconnecting { attempt });
            }
            SignalingEvent::Reopened => {
                self.publish(RoomEventKind::SignalingReopened);
                self.set_state(RoomState::Connected);
                self.sync_speaking();
            }
            SignalingEvent::Failed(err) => {
                self.release_room().await;
                self.fail(err.into());
            }
        }
    }

    async fn on_message(&mut self, msg: SignalingMessage) {
        if self.state != RoomState::Connected {
            debug!(room = %self.cfg.room_id, kind = msg.kind(), "message before room is connected");
            return;
        }
        if let (Some(to), Some(me)) = (msg.to_user_id(), self.cfg.user_id()) {
            if to != me {
                debug!(room = %self.cfg.room_id, kind = msg.kind(), %to, "message for another user");
                return;
            }
        }
        match msg {
            SignalingMessage::Offer(offer) => {
                let Some(from) = offer.from_user_id.filter(|s| !s.trim().is_empty()) else {
                    warn!(room = %self.cfg.room_id, "offer without sender dropped");
                    return;
                };
                self.on_offer(&from, offer.sdp).await;
            }
            SignalingMessage::Answer(answer) => {
                debug!(
                    room = %self.cfg.room_id,
                    from = answer.from_user_id.as_deref().unwrap_or_default(),
                    "unexpected answer ignored"
                );
            }
            SignalingMessage::IceCandidate(cand) => {
                let Some(from) = cand.from_user_id.filter(|s| !s.trim().is_empty()) else {
                    debug!(room = %self.cfg.room_id, "candidate without sender dropped");
                    self.metrics.ice_candidate_dropped();
                    return;
                };
                self.on_remote_candidate(&from, cand.candidate).await;
            }
            SignalingMessage::ChatMessage(chat) => self.publish(RoomEventKind::ChatMessage(chat)),
            SignalingMessage::Unknown => {}
        }
    }

    async fn on_offer(&mut self, from: &str, sdp: String) {
        self.next_session += 1;
        let session = self.next_session;
        let link = match self
            .connector
            .create(from, session, self.media.stream(), self.peer_tx.clone())
            .await
        {
            Ok(link) => link,
            Err(e) => {
                warn!(peer = %from, "peer connection setup failed: {e:#}");
                self.metrics.peer_negotiation_failure();
                return;
            }
        };

        let joined = !self.registry.contains(from);
        self.reconnect.recovered(from);
        self.registry.upsert(from, session, link.clone()).await;
        if joined {
            self.publish(RoomEventKind::PeerJoined { peer_id: from.to_string() });
        }

        match answer_offer(link.as_ref(), sdp).await {
            Ok(answer) => {
                let msg = SignalingMessage::answer(&self.cfg.room_id, from, self.cfg.user_id(), answer.sdp);
                match self.signaling.send(&msg) {
                    Ok(()) => info!(peer = %from, "answer sent"),
                    Err(e) => warn!(peer = %from, "answer not sent: {e}"),
                }
            }
            Err(e) => {
                warn!(peer = %from, "negotiation failed: {e:#}");
                self.metrics.peer_negotiation_failure();
                self.registry.remove(from).await;
                self.publish(RoomEventKind::PeerLeft { peer_id: from.to_string() });
            }
        }
    }

    async fn on_remote_candidate(&mut self, from: &str, candidate: IceCandidateInit) {
        let Some(link) = self.registry.link(from) else {
            debug!(peer = %from, "candidate for unknown peer dropped");
            self.metrics.ice_candidate_dropped();
            return;
        };
        if let Err(e) = link.add_ice_candidate(candidate).await {
            warn!(peer = %from, "add ice candidate failed: {e:#}");
        }
    }

    async fn on_peer_event(&mut self, ev: PeerEvent) {
        if !self.registry.is_current(ev.peer_id(), ev.session()) {
            debug!(peer = %ev.peer_id(), session = ev.session(), "event from a replaced or closed link dropped");
            return;
        }
        match ev {
            PeerEvent::TrackReceived { peer_id, stream, .. } => {
                if self.registry.attach_remote_stream(&peer_id, stream) {
                    self.metrics.peer_seen(&peer_id);
                }
            }
            PeerEvent::IceCandidate { peer_id, candidate, .. } => {
                let msg = SignalingMessage::ice_candidate(&self.cfg.room_id, &peer_id, self.cfg.user_id(), candidate);
                if let Err(e) = self.signaling.send(&msg) {
                    debug!(peer = %peer_id, "local candidate not sent: {e}");
                }
            }
            PeerEvent::StateChanged { peer_id, state, .. } => {
                if !self.registry.set_state(&peer_id, state) {
                    return;
                }
                debug!(peer = %peer_id, ?state, "peer state");
                if state.is_lost() {
                    info!(peer = %peer_id, ?state, "peer connection lost, waiting for recovery");
                    self.reconnect.arm(&peer_id);
                } else if state == PeerConnectionState::Connected {
                    self.reconnect.recovered(&peer_id);
                    self.metrics.peer_seen(&peer_id);
                }
            }
        }
    }

    async fn on_reconnect_deadline(&mut self, pending: Vec<String>) {
        for peer_id in pending {
            let still_lost = self
                .registry
                .get(&peer_id)
                .map(|s| s.state().is_lost())
                .unwrap_or(false);
            if !still_lost {
                continue;
            }
            info!(peer = %peer_id, "peer did not recover, dropping session");
            self.registry.remove(&peer_id).await;
            self.publish(RoomEventKind::PeerConnectionLost { peer_id });
        }
    }
}

async fn answer_offer(link: &dyn PeerLink, sdp: String) -> anyhow::Result<SessionDescription> {
    link.set_remote_description(SessionDescription::offer(sdp))
        .await
        .context("apply remote offer")?;
    let answer = link.create_answer().await.context("create answer")?;
    link.set_local_description(answer.clone())
        .await
        .context("apply local answer")?;
    Ok(answer)
}
