/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-memory stand-ins for the network, the microphone, the WebRTC stack
//! and playback, shared by the unit tests.

use crate::audio_output::{AudioOutput, AudioOutputFactory};
use crate::error::{MediaError, SignalingError};
use crate::local_media::{AudioConstraints, CaptureDevice, CaptureStream, CapturedFrame, LocalAudioStream};
use crate::peer_factory::{
    PeerConnector, PeerEvent, PeerEventSender, PeerLink, RemoteAudioStream, SessionDescription, SessionId,
};
use crate::signaling::{DialRequest, Dialer, WireChannel};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chyme_protocol::IceCandidateInit;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Server side of one fake signaling connection.
pub(crate) struct FakeRemote {
    /// Frames the client sent.
    pub sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Result<String, SignalingError>>,
}

impl FakeRemote {
    pub fn push(&self, text: &str) {
        self.inbound.send(Ok(text.to_string())).unwrap();
    }

    /// Breaks the connection with a transport error.
    pub fn fail(&self, err: SignalingError) {
        self.inbound.send(Err(err)).unwrap();
    }
}

#[derive(Default)]
pub(crate) struct FakeDialer {
    failures: Mutex<VecDeque<SignalingError>>,
    dials: AtomicUsize,
    last: Mutex<Option<DialRequest>>,
    remotes: Mutex<VecDeque<FakeRemote>>,
    gates: Mutex<VecDeque<Arc<Notify>>>,
}

impl FakeDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a failure for the next dial; later dials succeed again.
    pub fn fail_next(&self, err: SignalingError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Holds the next dial until the returned gate is notified.
    pub fn hold_next(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().push_back(gate.clone());
        gate
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<DialRequest> {
        self.last.lock().unwrap().clone()
    }

    /// Oldest connection not yet taken. Dropping it closes the connection.
    pub fn take_remote(&self) -> Option<FakeRemote> {
        self.remotes.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, request: &DialRequest) -> Result<WireChannel, SignalingError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        let gate = self.gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Result<String, SignalingError>>();
        self.remotes.lock().unwrap().push_back(FakeRemote {
            sent: sent_rx,
            inbound: inbound_tx,
        });

        let sink = futures_util::sink::unfold(sent_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| SignalingError::Closed("remote gone".to_string()))?;
            Ok::<_, SignalingError>(tx)
        });
        let stream = futures_util::stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(WireChannel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeCapture {
    failure: Mutex<Option<MediaError>>,
    opens: AtomicUsize,
    constraints: Mutex<Option<AudioConstraints>>,
    frames: Mutex<Option<mpsc::Sender<CapturedFrame>>>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next open only.
    pub fn fail_with(&self, err: MediaError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_constraints(&self) -> Option<AudioConstraints> {
        self.constraints.lock().unwrap().clone()
    }

    /// Feeds one frame into the most recently opened stream.
    pub async fn push(&self, pcm: Vec<f32>) {
        let tx = self.frames.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx
                .send(CapturedFrame {
                    pcm,
                    encoded: Bytes::new(),
                    duration: Duration::from_millis(10),
                })
                .await;
        }
    }
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn open(&self, constraints: &AudioConstraints) -> Result<CaptureStream, MediaError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.constraints.lock().unwrap() = Some(constraints.clone());
        if let Some(err) = self.failure.lock().unwrap().take() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(64);
        *self.frames.lock().unwrap() = Some(tx);
        Ok(CaptureStream {
            label: "fake microphone".to_string(),
            frames: rx,
        })
    }
}

pub(crate) struct FakeLink {
    peer_id: String,
    session: SessionId,
    fail_negotiation: bool,
    closes: AtomicUsize,
    remote: Mutex<Vec<String>>,
    local: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidateInit>>,
}

impl FakeLink {
    pub fn new(peer_id: &str) -> Arc<Self> {
        Self::build(peer_id, 0, false)
    }

    fn build(peer_id: &str, session: SessionId, fail_negotiation: bool) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.to_string(),
            session,
            fail_negotiation,
            closes: AtomicUsize::new(0),
            remote: Mutex::new(Vec::new()),
            local: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn remote_descriptions(&self) -> Vec<String> {
        self.remote.lock().unwrap().clone()
    }

    pub fn local_descriptions(&self) -> Vec<String> {
        self.local.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidateInit> {
        self.candidates.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.fail_negotiation {
            bail!("remote description rejected");
        }
        self.remote.lock().unwrap().push(desc.sdp);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer(format!("answer-for-{}", self.peer_id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.local.lock().unwrap().push(desc.sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    links: Mutex<Vec<Arc<FakeLink>>>,
    with_local: Mutex<HashMap<String, bool>>,
    failing: Mutex<HashSet<String>>,
    events: Mutex<Option<PeerEventSender>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_negotiation_for(&self, peer_id: &str) {
        self.failing.lock().unwrap().insert(peer_id.to_string());
    }

    /// Most recent link created for `peer_id`.
    pub fn link(&self, peer_id: &str) -> Option<Arc<FakeLink>> {
        self.links
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|l| l.peer_id == peer_id)
            .cloned()
    }

    pub fn created(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn created_with_local_media(&self, peer_id: &str) -> bool {
        self.with_local.lock().unwrap().get(peer_id).copied().unwrap_or(false)
    }

    /// Delivers an event as if a link had observed it.
    pub fn emit(&self, ev: PeerEvent) {
        let tx = self.events.lock().unwrap().clone();
        tx.expect("no link created yet").send(ev).unwrap();
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create(
        &self,
        remote_peer_id: &str,
        session: SessionId,
        local: Option<&LocalAudioStream>,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        let failing = self.failing.lock().unwrap().contains(remote_peer_id);
        let link = FakeLink::build(remote_peer_id, session, failing);
        self.links.lock().unwrap().push(link.clone());
        self.with_local
            .lock()
            .unwrap()
            .insert(remote_peer_id.to_string(), local.is_some());
        *self.events.lock().unwrap() = Some(events);
        Ok(link)
    }
}

pub(crate) struct FakeOutputState {
    peer_id: String,
    muted: AtomicBool,
    playing: AtomicBool,
    bound: Mutex<Option<String>>,
}

impl FakeOutputState {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn bound_stream(&self) -> Option<String> {
        self.bound.lock().unwrap().clone()
    }
}

struct FakeOutput(Arc<FakeOutputState>);

impl AudioOutput for FakeOutput {
    fn bind(&mut self, stream: RemoteAudioStream) {
        *self.0.bound.lock().unwrap() = Some(stream.stream_id().to_string());
    }

    fn set_muted(&mut self, muted: bool) {
        self.0.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.0.muted.load(Ordering::SeqCst)
    }

    fn play(&mut self) {
        self.0.playing.store(true, Ordering::SeqCst);
    }

    fn pause(&mut self) {
        self.0.playing.store(false, Ordering::SeqCst);
    }

    fn detach(&mut self) {
        *self.0.bound.lock().unwrap() = None;
    }
}

#[derive(Default)]
pub(crate) struct FakeOutputFactory {
    outputs: Mutex<Vec<Arc<FakeOutputState>>>,
}

impl FakeOutputFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }

    pub fn output(&self, peer_id: &str) -> Option<Arc<FakeOutputState>> {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|o| o.peer_id == peer_id)
            .cloned()
    }
}

impl AudioOutputFactory for FakeOutputFactory {
    fn create(&self, peer_id: &str) -> Box<dyn AudioOutput> {
        let state = Arc::new(FakeOutputState {
            peer_id: peer_id.to_string(),
            muted: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            bound: Mutex::new(None),
        });
        self.outputs.lock().unwrap().push(state.clone());
        Box::new(FakeOutput(state))
    }
}
