/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Background room connections addressed by numeric handle, for hosts that
//! embed the core through FFI or run it from a plain thread.

use crate::config::RoomAudioConfig;
use crate::local_media::{CaptureDevice, NoCaptureDevice};
use crate::net_metrics::NetMetrics;
use crate::room_audio::{RoomAudioController, RoomAudioDeps, RoomState};
use crate::room_events::{RoomEvent, RoomEventKind};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

static HANDLE_SEQ: AtomicU64 = AtomicU64::new(1);
static REGISTRY: Mutex<Vec<(u64, RunningRoom)>> = Mutex::new(Vec::new());

/// Events kept for hosts that poll.
const EVENT_BACKLOG: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomCommand {
    ToggleMute,
}

struct RunningRoom {
    shutdown_tx: watch::Sender<bool>,
    commands: mpsc::UnboundedSender<RoomCommand>,
    metrics: Arc<NetMetrics>,
    state: watch::Receiver<RoomState>,
    backlog: Arc<Mutex<VecDeque<RoomEvent>>>,
    join: Option<thread::JoinHandle<()>>,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init()
        .ok();
}

/// Joins the room on a background thread without capturing audio.
pub fn start(cfg: RoomAudioConfig) -> Result<u64> {
    start_with_capture(cfg, Arc::new(NoCaptureDevice))
}

pub fn start_with_capture(cfg: RoomAudioConfig, capture: Arc<dyn CaptureDevice>) -> Result<u64> {
    init_tracing();
    cfg.validate()?;

    let handle = HANDLE_SEQ.fetch_add(1, Ordering::Relaxed);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(RoomState::Disconnected);
    let metrics = Arc::new(NetMetrics::new());
    let backlog = Arc::new(Mutex::new(VecDeque::new()));

    let worker = RoomWorker {
        cfg,
        capture,
        metrics: metrics.clone(),
        state: state_tx,
        backlog: backlog.clone(),
    };
    let join = thread::Builder::new()
        .name(format!("chyme-room-{handle}"))
        .spawn(move || {
            if let Err(e) = worker.run(shutdown_rx, commands_rx) {
                error!("room runtime failed: {e:#}");
            }
        })
        .context("spawn room thread")?;

    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((
            handle,
            RunningRoom {
                shutdown_tx,
                commands: commands_tx,
                metrics,
                state: state_rx,
                backlog,
                join: Some(join),
            },
        ));
    Ok(handle)
}

pub fn stop(handle: u64) -> Result<()> {
    let join = {
        let mut reg = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = reg
            .iter()
            .position(|(h, _)| *h == handle)
            .context("invalid handle")?;
        let (_, mut running) = reg.swap_remove(idx);
        running.shutdown_tx.send_replace(true);
        running.join.take()
    };

    // Never block the caller on the room's teardown.
    if let Some(j) = join {
        thread::spawn(move || {
            let _ = j.join();
        });
    }
    Ok(())
}

pub fn send_command(handle: u64, command: RoomCommand) -> Result<()> {
    with_room(handle, |room| {
        room.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("room {handle} is no longer running"))
    })?
}

pub fn toggle_mute(handle: u64) -> Result<()> {
    send_command(handle, RoomCommand::ToggleMute)
}

/// Room state plus the network counters.
pub fn status_json(handle: u64) -> Result<serde_json::Value> {
    with_room(handle, |room| {
        let state = *room.state.borrow();
        serde_json::json!({
            "handle": handle,
            "state": state,
            "net": room.metrics.snapshot_json(),
        })
    })
}

/// Removes and returns up to `max` buffered events, oldest first.
pub fn drain_events(handle: u64, max: usize) -> Result<Vec<RoomEvent>> {
    with_room(handle, |room| {
        let mut backlog = room.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        let n = max.min(backlog.len());
        backlog.drain(..n).collect()
    })
}

fn with_room<T>(handle: u64, f: impl FnOnce(&RunningRoom) -> T) -> Result<T> {
    let reg = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    let (_, room) = reg
        .iter()
        .find(|(h, _)| *h == handle)
        .context("invalid handle")?;
    Ok(f(room))
}

struct RoomWorker {
    cfg: RoomAudioConfig,
    capture: Arc<dyn CaptureDevice>,
    metrics: Arc<NetMetrics>,
    state: watch::Sender<RoomState>,
    backlog: Arc<Mutex<VecDeque<RoomEvent>>>,
}

impl RoomWorker {
    fn record(&self, ev: RoomEvent) {
        if let RoomEventKind::StateChanged { state } = ev.kind {
            self.state.send_replace(state);
        }
        let mut backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        if backlog.len() >= EVENT_BACKLOG {
            backlog.pop_front();
        }
        backlog.push_back(ev);
    }

    fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut commands: mpsc::UnboundedReceiver<RoomCommand>,
    ) -> Result<()> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("build tokio runtime")?;

        rt.block_on(async move {
            let deps = RoomAudioDeps::native(&self.cfg, self.capture.clone(), self.metrics.clone());
            let mut room = RoomAudioController::new(self.cfg.clone(), deps);
            let mut events = room.subscribe();
            info!(room = %self.cfg.room_id, listen_only = self.cfg.listen_only(), "room starting");

            if let Err(e) = room.connect().await {
                warn!(room = %self.cfg.room_id, "room did not connect: {e}");
            }

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    Some(command) = commands.recv() => match command {
                        RoomCommand::ToggleMute => {
                            room.toggle_mute();
                        }
                    },
                    ev = events.recv() => match ev {
                        Ok(ev) => self.record(ev),
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "room events lagged"),
                        Err(RecvError::Closed) => break,
                    },
                    input = room.recv_input() => room.handle_input(input).await,
                }
            }

            room.disconnect().await;
            while let Ok(ev) = events.try_recv() {
                self.record(ev);
            }
            info!(room = %self.cfg.room_id, "room stopped");
            Ok(())
        })
    }
}
