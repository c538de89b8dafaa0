/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::net_metrics::NetMetrics;
use crate::peer_factory::RemoteAudioStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Per-peer playback bound to a remote stream.
pub trait AudioOutput: Send {
    fn bind(&mut self, stream: RemoteAudioStream);
    fn set_muted(&mut self, muted: bool);
    fn is_muted(&self) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
    /// Unbinds the stream and releases anything reading from it.
    fn detach(&mut self);
}

pub trait AudioOutputFactory: Send + Sync {
    fn create(&self, peer_id: &str) -> Box<dyn AudioOutput>;
}

/// Receives the Opus payloads of audible peers.
pub trait PlaybackSink: Send + Sync {
    fn push(&self, peer_id: &str, payload: &[u8]);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardSink;

impl PlaybackSink for DiscardSink {
    fn push(&self, _peer_id: &str, _payload: &[u8]) {}
}

pub struct RtpPlaybackFactory {
    metrics: Arc<NetMetrics>,
    sink: Arc<dyn PlaybackSink>,
}

impl RtpPlaybackFactory {
    pub fn new(metrics: Arc<NetMetrics>, sink: Arc<dyn PlaybackSink>) -> Self {
        Self { metrics, sink }
    }
}

impl AudioOutputFactory for RtpPlaybackFactory {
    fn create(&self, peer_id: &str) -> Box<dyn AudioOutput> {
        Box::new(RtpPlayback {
            peer_id: peer_id.to_string(),
            muted: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            stream: None,
            drain: None,
            metrics: self.metrics.clone(),
            sink: self.sink.clone(),
        })
    }
}

/// Drains RTP from the bound remote track. Packets are always read so the
/// receiver keeps up; they reach the sink only while playing and unmuted.
pub struct RtpPlayback {
    peer_id: String,
    muted: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    stream: Option<RemoteAudioStream>,
    drain: Option<JoinHandle<()>>,
    metrics: Arc<NetMetrics>,
    sink: Arc<dyn PlaybackSink>,
}

impl RtpPlayback {
    fn stop_drain(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

impl AudioOutput for RtpPlayback {
    fn bind(&mut self, stream: RemoteAudioStream) {
        self.stop_drain();
        debug!(peer = %self.peer_id, stream = stream.stream_id(), "bind remote stream");
        self.stream = Some(stream);
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn play(&mut self) {
        self.playing.store(true, Ordering::Relaxed);
        if self.drain.is_some() {
            return;
        }
        let Some(track) = self.stream.as_ref().and_then(|s| s.track()).cloned() else {
            return;
        };
        let peer_id = self.peer_id.clone();
        let muted = self.muted.clone();
        let playing = self.playing.clone();
        let metrics = self.metrics.clone();
        let sink = self.sink.clone();
        self.drain = Some(tokio::spawn(async move {
            loop {
                match track.read_rtp().await {
                    Ok((packet, _)) => {
                        metrics.remote_rx_add(packet.payload.len() as u64);
                        if playing.load(Ordering::Relaxed) && !muted.load(Ordering::Relaxed) {
                            sink.push(&peer_id, &packet.payload);
                        }
                    }
                    Err(e) => {
                        debug!(peer = %peer_id, "remote track ended: {e}");
                        break;
                    }
                }
            }
        }));
    }

    fn pause(&mut self) {
        self.playing.store(false, Ordering::Relaxed);
    }

    fn detach(&mut self) {
        self.stop_drain();
        self.stream = None;
    }
}

impl Drop for RtpPlayback {
    fn drop(&mut self) {
        self.stop_drain();
    }
}
