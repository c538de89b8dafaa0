/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Room signaling channel.
//!
//! One websocket per room connection. Inbound frames are parsed, filtered by
//! room id and handed to the controller as [`SignalingEvent`]s; outbound
//! messages are queued to the connection task. The task owns the socket, so
//! the client itself never blocks on the network after `connect` returns.

use crate::backoff::{sleep_with_jitter, ReconnectPolicy};
use crate::config::RoomAudioConfig;
use crate::error::SignalingError;
use crate::net_metrics::NetMetrics;
use async_trait::async_trait;
use chyme_protocol::SignalingMessage;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub type WireSink = Pin<Box<dyn Sink<String, Error = SignalingError> + Send>>;
pub type WireStream = Pin<Box<dyn Stream<Item = Result<String, SignalingError>> + Send>>;

/// An open text channel: frames out, frames in.
pub struct WireChannel {
    pub sink: WireSink,
    pub stream: WireStream,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialRequest {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` on the upgrade request.
    pub bearer: Option<String>,
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, request: &DialRequest) -> Result<WireChannel, SignalingError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Error,
}

#[derive(Debug)]
pub enum SignalingEvent {
    Message(SignalingMessage),
    /// The server side went away. `will_reconnect` tells whether re-dialing follows.
    Closed { reason: String, will_reconnect: bool },
    Reconnecting { attempt: u32 },
    Reopened,
    Failed(SignalingError),
}

/// Where and as whom to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalingTarget {
    pub room_id: String,
    pub endpoint: String,
    pub user_id: Option<String>,
    pub auth_token: Option<String>,
}

impl SignalingTarget {
    pub fn from_config(cfg: &RoomAudioConfig) -> Self {
        Self {
            room_id: cfg.room_id.trim().to_string(),
            endpoint: cfg.signaling_endpoint.trim().to_string(),
            user_id: cfg.user_id().map(str::to_string),
            auth_token: cfg.auth_token().map(str::to_string),
        }
    }

    pub fn dial_request(&self) -> Result<DialRequest, SignalingError> {
        let url = channel_url(
            &self.endpoint,
            &self.room_id,
            self.user_id.as_deref(),
            self.auth_token.as_deref(),
        )?;
        Ok(DialRequest {
            url,
            bearer: self.auth_token.clone(),
        })
    }
}

/// Builds `<ws|wss>://<host><path>?roomId=..[&userId=..][&token=..]`.
/// Any query or fragment on the endpoint is discarded.
pub fn channel_url(
    endpoint: &str,
    room_id: &str,
    user_id: Option<&str>,
    token: Option<&str>,
) -> Result<String, SignalingError> {
    let endpoint = endpoint.trim();
    let (scheme, rest) = if let Some(rest) = endpoint.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        ("ws", rest)
    } else if let Some(rest) = endpoint.strip_prefix("wss://") {
        ("wss", rest)
    } else if let Some(rest) = endpoint.strip_prefix("ws://") {
        ("ws", rest)
    } else {
        return Err(SignalingError::InvalidEndpoint(format!(
            "unsupported scheme: {endpoint}"
        )));
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(SignalingError::InvalidEndpoint(format!("missing host: {endpoint}")));
    }
    if room_id.trim().is_empty() {
        return Err(SignalingError::InvalidEndpoint("missing room id".to_string()));
    }

    let mut url = format!("{scheme}://{rest}?roomId={}", urlencoding::encode(room_id));
    if let Some(user_id) = user_id {
        url.push_str("&userId=");
        url.push_str(&urlencoding::encode(user_id));
    }
    if let Some(token) = token {
        url.push_str("&token=");
        url.push_str(&urlencoding::encode(token));
    }
    Ok(url)
}

pub struct SignalingClient {
    dialer: Arc<dyn Dialer>,
    policy: Option<ReconnectPolicy>,
    metrics: Arc<NetMetrics>,
    state: Arc<watch::Sender<SignalingState>>,
    events: mpsc::UnboundedSender<SignalingEvent>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<watch::Sender<bool>>,
    /// Bumped whenever the running task is stopped. A task whose stamp no
    /// longer matches writes no state and sends no events.
    generation: Arc<AtomicU64>,
}

impl SignalingClient {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        policy: Option<ReconnectPolicy>,
        metrics: Arc<NetMetrics>,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SignalingState::Idle);
        (
            Self {
                dialer,
                policy,
                metrics,
                state: Arc::new(state),
                events,
                outbound: None,
                shutdown: None,
                generation: Arc::new(AtomicU64::new(0)),
            },
            events_rx,
        )
    }

    pub fn state(&self) -> SignalingState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SignalingState> {
        self.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SignalingState::Open
    }

    /// Opens the channel and spawns its connection task.
    /// No-op while the channel is already open or being (re)established.
    pub async fn connect(&mut self, target: &SignalingTarget) -> Result<(), SignalingError> {
        if matches!(
            self.state(),
            SignalingState::Open | SignalingState::Connecting | SignalingState::Reconnecting
        ) {
            debug!(room = %target.room_id, "signaling already connected");
            return Ok(());
        }
        self.stop_task();

        let request = match target.dial_request() {
            Ok(request) => request,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        self.state.send_replace(SignalingState::Connecting);
        info!(room = %target.room_id, anonymous = request.bearer.is_none(), "signaling connecting");
        let channel = match self.dialer.dial(&request).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(room = %target.room_id, "signaling connect failed: {e}");
                self.fail(&e);
                return Err(e);
            }
        };

        self.state.send_replace(SignalingState::Open);
        self.metrics.set_signaling_connected(true);
        info!(room = %target.room_id, "signaling open");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = ConnectionTask {
            room_id: target.room_id.clone(),
            request,
            dialer: self.dialer.clone(),
            policy: self.policy.clone(),
            metrics: self.metrics.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            generation: self.generation.load(Ordering::SeqCst),
            live: self.generation.clone(),
        };
        tokio::spawn(task.run(channel, outbound_rx, shutdown_rx));
        self.outbound = Some(outbound_tx);
        self.shutdown = Some(shutdown_tx);
        Ok(())
    }

    pub fn send(&self, msg: &SignalingMessage) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::NotOpen);
        }
        let Some(outbound) = &self.outbound else {
            return Err(SignalingError::NotOpen);
        };
        let text = msg.to_json().map_err(|e| SignalingError::Encode(e.to_string()))?;
        outbound.send(text).map_err(|_| SignalingError::NotOpen)
    }

    /// Closes the channel. Never triggers a reconnect. Safe to call repeatedly.
    pub fn close(&mut self) {
        let had_task = self.stop_task();
        if had_task || self.state() != SignalingState::Idle {
            if self.state() != SignalingState::Closed {
                debug!("signaling closed locally");
            }
            self.state.send_replace(SignalingState::Closed);
            self.metrics.set_signaling_connected(false);
        }
    }

    fn stop_task(&mut self) -> bool {
        self.outbound = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        match self.shutdown.take() {
            Some(shutdown) => {
                shutdown.send_replace(true);
                true
            }
            None => false,
        }
    }

    fn fail(&self, err: &SignalingError) {
        self.state.send_replace(SignalingState::Error);
        self.metrics.set_signaling_error(err.to_string());
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.stop_task();
    }
}

enum ChannelEnd {
    Shutdown,
    Remote(String),
    Errored(SignalingError),
}

enum Redial {
    Reopened(WireChannel),
    Shutdown,
    Exhausted(u32),
}

struct ConnectionTask {
    room_id: String,
    request: DialRequest,
    dialer: Arc<dyn Dialer>,
    policy: Option<ReconnectPolicy>,
    metrics: Arc<NetMetrics>,
    state: Arc<watch::Sender<SignalingState>>,
    events: mpsc::UnboundedSender<SignalingEvent>,
    generation: u64,
    live: Arc<AtomicU64>,
}

impl ConnectionTask {
    fn is_current(&self) -> bool {
        self.live.load(Ordering::SeqCst) == self.generation
    }

    fn set_state(&self, state: SignalingState) {
        if self.is_current() {
            self.state.send_replace(state);
        }
    }

    fn emit(&self, ev: SignalingEvent) {
        if self.is_current() {
            let _ = self.events.send(ev);
        }
    }

    async fn run(
        self,
        mut channel: WireChannel,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let end = self.pump(&mut channel, &mut outbound, &mut shutdown).await;
            if !self.is_current() {
                debug!(room = %self.room_id, "stale signaling task exiting");
                let _ = channel.sink.close().await;
                return;
            }
            let reason = match end {
                ChannelEnd::Shutdown => {
                    let _ = channel.sink.close().await;
                    return;
                }
                ChannelEnd::Remote(reason) => reason,
                ChannelEnd::Errored(err) if self.policy.is_none() => {
                    warn!(room = %self.room_id, "signaling error: {err}");
                    self.set_state(SignalingState::Error);
                    self.metrics.set_signaling_error(err.to_string());
                    self.emit(SignalingEvent::Failed(err));
                    return;
                }
                ChannelEnd::Errored(err) => err.to_string(),
            };

            let Some(policy) = self.policy.as_ref() else {
                info!(room = %self.room_id, %reason, "signaling closed by remote");
                self.set_state(SignalingState::Closed);
                self.metrics.set_signaling_connected(false);
                self.emit(SignalingEvent::Closed {
                    reason,
                    will_reconnect: false,
                });
                return;
            };

            warn!(room = %self.room_id, %reason, "signaling lost, re-dialing");
            self.metrics.set_signaling_error(reason.clone());
            self.emit(SignalingEvent::Closed {
                reason,
                will_reconnect: true,
            });
            match self.redial(policy, &mut shutdown).await {
                Redial::Reopened(mut next) => {
                    if !self.is_current() || *shutdown.borrow() {
                        debug!(room = %self.room_id, "re-dial finished after close, dropping channel");
                        let _ = next.sink.close().await;
                        return;
                    }
                    channel = next;
                    self.set_state(SignalingState::Open);
                    self.metrics.set_signaling_connected(true);
                    self.metrics.signaling_reconnect();
                    info!(room = %self.room_id, "signaling reopened");
                    self.emit(SignalingEvent::Reopened);
                }
                Redial::Shutdown => return,
                Redial::Exhausted(attempts) => {
                    if !self.is_current() {
                        return;
                    }
                    let err = SignalingError::ReconnectExhausted { attempts };
                    warn!(room = %self.room_id, "{err}");
                    self.set_state(SignalingState::Error);
                    self.metrics.set_signaling_error(err.to_string());
                    self.emit(SignalingEvent::Failed(err));
                    return;
                }
            }
        }
    }

    async fn pump(
        &self,
        channel: &mut WireChannel,
        outbound: &mut mpsc::UnboundedReceiver<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ChannelEnd {
        loop {
            if *shutdown.borrow() {
                return ChannelEnd::Shutdown;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return ChannelEnd::Shutdown;
                    }
                }
                out = outbound.recv() => {
                    let Some(text) = out else {
                        return ChannelEnd::Shutdown;
                    };
                    let len = text.len() as u64;
                    if let Err(e) = channel.sink.send(text).await {
                        return ChannelEnd::Errored(e);
                    }
                    self.metrics.signaling_tx_add(len);
                }
                inbound = channel.stream.next() => match inbound {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => return ChannelEnd::Errored(e),
                    None => return ChannelEnd::Remote("closed by server".to_string()),
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        self.metrics.signaling_rx_add(text.len() as u64);
        let msg = match SignalingMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(room = %self.room_id, "dropping malformed signaling message: {e}");
                self.metrics.signaling_parse_error();
                return;
            }
        };
        if msg == SignalingMessage::Unknown {
            debug!(room = %self.room_id, "ignoring unhandled signaling message type");
            return;
        }
        if msg.room_id() != Some(self.room_id.as_str()) {
            debug!(
                room = %self.room_id,
                other = msg.room_id().unwrap_or_default(),
                kind = msg.kind(),
                "dropping message for another room"
            );
            return;
        }
        self.emit(SignalingEvent::Message(msg));
    }

    async fn redial(&self, policy: &ReconnectPolicy, shutdown: &mut watch::Receiver<bool>) -> Redial {
        for attempt in 1..=policy.max_attempts {
            if *shutdown.borrow() || !self.is_current() {
                return Redial::Shutdown;
            }
            self.set_state(SignalingState::Reconnecting);
            self.emit(SignalingEvent::Reconnecting { attempt });

            tokio::select! {
                _ = sleep_with_jitter(policy.delay_for(attempt)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Redial::Shutdown;
                    }
                }
            }
            if *shutdown.borrow() {
                return Redial::Shutdown;
            }

            match self.dialer.dial(&self.request).await {
                Ok(channel) => return Redial::Reopened(channel),
                Err(_) if *shutdown.borrow() || !self.is_current() => return Redial::Shutdown,
                Err(e) => {
                    debug!(room = %self.room_id, attempt, "signaling re-dial failed: {e}");
                    self.metrics.set_signaling_error(e.to_string());
                }
            }
        }
        Redial::Exhausted(policy.max_attempts)
    }
}
