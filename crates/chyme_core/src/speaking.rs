/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::analyser::{FrequencyAnalyser, FFT_SIZE};
use crate::room_events::{RoomEvent, RoomEventKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Publishes whether the local user is speaking, sampled on a fixed cadence.
pub struct SpeakingMonitor {
    room_id: String,
    threshold: f32,
    interval: Duration,
    speaking: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<RoomEvent>,
    task: Option<JoinHandle<()>>,
}

impl SpeakingMonitor {
    pub fn new(
        room_id: &str,
        threshold: f32,
        interval: Duration,
        events: broadcast::Sender<RoomEvent>,
    ) -> Self {
        let (speaking, _) = watch::channel(false);
        Self {
            room_id: room_id.to_string(),
            threshold,
            interval,
            speaking: Arc::new(speaking),
            events,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }

    /// Starts analysing `pcm`. A monitor already running keeps its source.
    pub fn start(&mut self, mut pcm: broadcast::Receiver<Arc<[f32]>>) {
        if self.task.is_some() {
            return;
        }
        debug!(room = %self.room_id, "speaking detection started");
        let threshold = self.threshold;
        let interval = self.interval;
        let publisher = Publisher {
            room_id: self.room_id.clone(),
            speaking: self.speaking.clone(),
            events: self.events.clone(),
        };
        self.task = Some(tokio::spawn(async move {
            let mut analyser = FrequencyAnalyser::new(FFT_SIZE);
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    frame = pcm.recv() => match frame {
                        Ok(frame) => analyser.push_samples(&frame),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = tick.tick() => {
                        publisher.set(analyser.average_energy() > threshold);
                    }
                }
            }
            publisher.set(false);
        }));
    }

    /// Stops analysis and reports not-speaking.
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        debug!(room = %self.room_id, "speaking detection stopped");
        Publisher {
            room_id: self.room_id.clone(),
            speaking: self.speaking.clone(),
            events: self.events.clone(),
        }
        .set(false);
    }
}

impl Drop for SpeakingMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Publisher {
    room_id: String,
    speaking: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<RoomEvent>,
}

impl Publisher {
    fn set(&self, speaking: bool) {
        let changed = self.speaking.send_if_modified(|current| {
            if *current == speaking {
                return false;
            }
            *current = speaking;
            true
        });
        if changed {
            let _ = self
                .events
                .send(RoomEvent::new(&self.room_id, RoomEventKind::SpeakingChanged { speaking }));
        }
    }
}
