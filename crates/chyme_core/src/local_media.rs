/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::MediaError;
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Analysis taps keep at most this many frames queued before lagging.
const PCM_TAP_CAPACITY: usize = 64;

/// What is requested from the capture device. Voice rooms always ask for
/// processed mono audio from the default device.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub video: bool,
    pub device_id: Option<String>,
}

impl AudioConstraints {
    pub fn voice() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            video: false,
            device_id: None,
        }
    }
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self::voice()
    }
}

/// One captured chunk: raw PCM for analysis plus its Opus encoding for the wire.
#[derive(Clone, Debug, Default)]
pub struct CapturedFrame {
    pub pcm: Vec<f32>,
    /// Empty when the device does not encode; such frames are analysed but not sent.
    pub encoded: Bytes,
    pub duration: Duration,
}

pub struct CaptureStream {
    pub label: String,
    pub frames: mpsc::Receiver<CapturedFrame>,
}

/// Platform capture backend. Dropping the returned receiver stops the device.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self, constraints: &AudioConstraints) -> Result<CaptureStream, MediaError>;
}

/// Used by hosts that never capture (headless listeners).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCaptureDevice;

#[async_trait]
impl CaptureDevice for NoCaptureDevice {
    async fn open(&self, _constraints: &AudioConstraints) -> Result<CaptureStream, MediaError> {
        Err(MediaError::DeviceUnavailable("no capture backend configured".to_string()))
    }
}

fn random_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

pub struct LocalAudioTrack {
    id: String,
    label: String,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
    rtc: Arc<TrackLocalStaticSample>,
    pcm: broadcast::Sender<Arc<[f32]>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LocalAudioTrack {
    fn start(stream_id: &str, capture: CaptureStream) -> Arc<Self> {
        let id = random_id();
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            format!("audio-{id}"),
            stream_id.to_string(),
        ));
        let (pcm, _) = broadcast::channel(PCM_TAP_CAPACITY);
        let track = Arc::new(Self {
            id,
            label: capture.label,
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
            rtc: rtc.clone(),
            pcm: pcm.clone(),
            pump: Mutex::new(None),
        });

        let enabled = track.enabled.clone();
        let live = track.live.clone();
        let track_id = track.id.clone();
        let mut frames = capture.frames;
        let handle = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if !enabled.load(Ordering::Relaxed) {
                    continue;
                }
                if !frame.encoded.is_empty() {
                    let sample = Sample {
                        data: frame.encoded,
                        duration: frame.duration,
                        ..Default::default()
                    };
                    if let Err(e) = rtc.write_sample(&sample).await {
                        trace!(track = %track_id, "write sample failed: {e}");
                    }
                }
                let _ = pcm.send(frame.pcm.into());
            }
            live.store(false, Ordering::Relaxed);
            debug!(track = %track_id, "capture ended");
        });
        *track.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        track
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disabled tracks stay live but send nothing.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::Relaxed);
        if let Some(pump) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtc.clone()
    }

    /// PCM of every frame captured while enabled.
    pub fn subscribe_pcm(&self) -> broadcast::Receiver<Arc<[f32]>> {
        self.pcm.subscribe()
    }
}

pub struct LocalAudioStream {
    id: String,
    tracks: Vec<Arc<LocalAudioTrack>>,
}

impl LocalAudioStream {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalAudioTrack>] {
        &self.tracks
    }

    pub fn first_track(&self) -> Option<&Arc<LocalAudioTrack>> {
        self.tracks.first()
    }
}

/// Owns the single local capture stream of a room connection.
pub struct LocalMediaManager {
    device: Arc<dyn CaptureDevice>,
    constraints: AudioConstraints,
    stream: Option<LocalAudioStream>,
    muted: bool,
}

impl LocalMediaManager {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            constraints: AudioConstraints::voice(),
            stream: None,
            muted: false,
        }
    }

    /// Opens a fresh capture stream, replacing any stream still held.
    pub async fn acquire(&mut self) -> Result<&LocalAudioStream, MediaError> {
        self.release();
        let capture = match self.device.open(&self.constraints).await {
            Ok(capture) => capture,
            Err(e) => {
                warn!("microphone access required: {e}");
                return Err(e);
            }
        };
        let stream_id = format!("chyme-local-{}", random_id());
        info!(stream = %stream_id, device = %capture.label, "local audio acquired");
        let track = LocalAudioTrack::start(&stream_id, capture);
        track.set_enabled(!self.muted);
        Ok(&*self.stream.insert(LocalAudioStream {
            id: stream_id,
            tracks: vec![track],
        }))
    }

    /// Stops every track and forgets the stream. Safe with nothing held.
    pub fn release(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        for track in &stream.tracks {
            track.stop();
        }
        info!(stream = %stream.id, "local audio released");
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(stream) = &self.stream {
            for track in &stream.tracks {
                track.set_enabled(!muted);
            }
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn stream(&self) -> Option<&LocalAudioStream> {
        self.stream.as_ref()
    }

    /// Live tracks currently held.
    pub fn track_count(&self) -> usize {
        self.stream
            .as_ref()
            .map(|s| s.tracks.iter().filter(|t| t.is_live()).count())
            .unwrap_or(0)
    }
}

impl Drop for LocalMediaManager {
    fn drop(&mut self) {
        self.release();
    }
}
