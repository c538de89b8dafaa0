/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Headless listener: joins the room named in a JSON config file without a
//! microphone and rejoins whenever the file changes.

use anyhow::{Context, Result};
use chyme_core::config::{load_config, RoomAudioConfig};
use chyme_core::runtime;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const STATUS_EVERY: u32 = 15;

fn default_config_path() -> PathBuf {
    if cfg!(target_os = "windows") {
        let base = std::env::var("APPDATA")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        return PathBuf::from(base).join("Chyme").join("listener.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("chyme").join("listener.json")
}

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn parse_config_path() -> Result<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args
                .next()
                .map(PathBuf::from)
                .context("--config requires a path");
        }
    }
    if let Ok(path) = std::env::var("CHYME_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(default_config_path())
}

fn listener_config(text: &str) -> Result<RoomAudioConfig> {
    let mut cfg = load_config(text)?;
    cfg.listen_only = Some(true);
    Ok(cfg)
}

fn drain_log(handle: u64) {
    let Ok(events) = runtime::drain_events(handle, 64) else {
        return;
    };
    for ev in events {
        match serde_json::to_string(&ev) {
            Ok(line) => info!(target: "chyme_listener::events", "{line}"),
            Err(e) => warn!("event encode failed: {e}"),
        }
    }
}

/// Tracks the config file between polls and reports when it needs applying.
struct ConfigWatch {
    path: PathBuf,
    applied: Option<u64>,
    rejected: Option<u64>,
    missing_logged: bool,
}

enum Poll {
    Unchanged,
    Changed { text: String, hash: u64 },
}

impl ConfigWatch {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            applied: None,
            rejected: None,
            missing_logged: false,
        }
    }

    fn poll(&mut self) -> Poll {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) => {
                if !self.missing_logged {
                    warn!("config missing: {} ({e})", self.path.display());
                    self.missing_logged = true;
                }
                return Poll::Unchanged;
            }
        };
        self.missing_logged = false;
        let hash = hash_text(&text);
        if self.applied == Some(hash) || self.rejected == Some(hash) {
            return Poll::Unchanged;
        }
        Poll::Changed { text, hash }
    }

    fn accept(&mut self, hash: u64) {
        self.applied = Some(hash);
        self.rejected = None;
    }

    fn reject(&mut self, hash: u64) {
        self.rejected = Some(hash);
    }
}

fn leave(handle: u64) {
    drain_log(handle);
    if let Err(e) = runtime::stop(handle) {
        warn!(handle, "leave room failed: {e:#}");
    }
}

fn join(watch: &mut ConfigWatch, cfg: RoomAudioConfig, hash: u64) -> Option<u64> {
    let room = cfg.room_id.clone();
    match runtime::start(cfg) {
        Ok(handle) => {
            watch.accept(hash);
            info!(room = %room, handle, "joined");
            Some(handle)
        }
        Err(e) => {
            error!(room = %room, "join failed: {e:#}");
            watch.reject(hash);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();
    let mut watch = ConfigWatch::new(parse_config_path()?);
    info!(config = %watch.path.display(), "chyme listener starting");

    let mut handle: Option<u64> = None;
    let mut ticks = 0u32;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown requested");
                break;
            }
            _ = poll.tick() => {}
        }

        if let Some(h) = handle {
            drain_log(h);
            ticks = ticks.wrapping_add(1);
            if ticks % STATUS_EVERY == 0 {
                if let Ok(status) = runtime::status_json(h) {
                    info!("status: {status}");
                }
            }
        }

        let Poll::Changed { text, hash } = watch.poll() else {
            continue;
        };
        // A config that fails to parse leaves the current room running.
        match listener_config(&text) {
            Ok(cfg) => {
                if let Some(h) = handle.take() {
                    leave(h);
                }
                handle = join(&mut watch, cfg, hash);
            }
            Err(e) => {
                warn!("invalid config: {e:#}");
                watch.reject(hash);
            }
        }
    }

    if let Some(h) = handle.take() {
        leave(h);
    }
    Ok(())
}
