//! Stuck-playback watchdog
//!
//! Samples the engine through its read-only probe on a fixed interval. When
//! the engine claims to be playing but the position stops moving for longer
//! than a state-specific threshold, a [`RecoveryRequest`] is sent to the
//! controller, which owns the engine and performs the actual recovery.
//! Requests are rate-limited by a cooldown so a persistent stall cannot cause
//! a recovery storm.

use crate::config::RuntimeSettings;
use crate::engine::{EngineProbe, EngineStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why the watchdog decided playback is stuck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallKind {
    /// Ready and asked to play, but the position is frozen
    Ready,
    /// Buffering for too long
    Buffering,
    /// Position ran past the track duration
    Overrun,
}

impl std::fmt::Display for StallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StallKind::Ready => f.write_str("no progress while ready"),
            StallKind::Buffering => f.write_str("buffering timeout"),
            StallKind::Overrun => f.write_str("position past duration"),
        }
    }
}

/// Ask the controller to recover the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub kind: StallKind,
    pub position_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub interval: Duration,
    pub ready_stall: Duration,
    pub buffering_stall: Duration,
    pub overrun_ms: u64,
    pub cooldown: Duration,
    pub progress_epsilon_ms: u64,
}

impl WatchdogConfig {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            interval: settings.watchdog_interval(),
            ready_stall: Duration::from_millis(settings.watchdog_ready_stall_ms),
            buffering_stall: Duration::from_millis(settings.watchdog_buffering_stall_ms),
            overrun_ms: settings.watchdog_overrun_ms,
            cooldown: Duration::from_millis(settings.watchdog_cooldown_ms),
            progress_epsilon_ms: settings.watchdog_progress_epsilon_ms,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

/// One reading of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub status: EngineStatus,
    pub play_when_ready: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
}

impl Observation {
    pub fn read(probe: &dyn EngineProbe) -> Self {
        Self {
            status: probe.status(),
            play_when_ready: probe.play_when_ready(),
            position_ms: probe.position_ms(),
            duration_ms: probe.duration_ms(),
        }
    }

    fn nominally_playing(&self) -> bool {
        self.play_when_ready
            && matches!(self.status, EngineStatus::Ready | EngineStatus::Buffering)
    }
}

/// Internal watchdog memory
#[derive(Debug, Clone, Copy)]
struct WatchdogSample {
    last_position_ms: u64,
    last_progress_at: Instant,
    last_recovery_at: Option<Instant>,
}

/// Stall detector
#[derive(Debug)]
pub struct Watchdog {
    config: WatchdogConfig,
    sample: WatchdogSample,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, now: Instant) -> Self {
        Self {
            config,
            sample: WatchdogSample {
                last_position_ms: 0,
                last_progress_at: now,
                last_recovery_at: None,
            },
        }
    }

    /// Feed one observation; returns the stall to recover from, if any
    pub fn evaluate(&mut self, obs: Observation, now: Instant) -> Option<StallKind> {
        let previous = self.sample.last_position_ms;
        self.sample.last_position_ms = obs.position_ms;

        if !obs.nominally_playing() {
            self.sample.last_progress_at = now;
            return None;
        }

        if obs.position_ms.abs_diff(previous) > self.config.progress_epsilon_ms {
            self.sample.last_progress_at = now;
        }

        let stall = if obs.duration_ms > 0
            && obs.position_ms > obs.duration_ms.saturating_add(self.config.overrun_ms)
        {
            Some(StallKind::Overrun)
        } else {
            let stalled_for = now.saturating_duration_since(self.sample.last_progress_at);
            let (kind, threshold) = match obs.status {
                EngineStatus::Buffering => (StallKind::Buffering, self.config.buffering_stall),
                _ => (StallKind::Ready, self.config.ready_stall),
            };
            (stalled_for > threshold).then_some(kind)
        }?;

        if let Some(last) = self.sample.last_recovery_at {
            if now.saturating_duration_since(last) < self.config.cooldown {
                debug!("Stall ({}) detected within recovery cooldown, not recovering", stall);
                return None;
            }
        }

        self.sample.last_recovery_at = Some(now);
        self.sample.last_progress_at = now;
        Some(stall)
    }

    pub fn last_recovery_at(&self) -> Option<Instant> {
        self.sample.last_recovery_at
    }
}

/// Spawn the watchdog loop
///
/// The loop ends when the controller side of `recover` is gone.
pub fn spawn_watchdog(
    probe: Arc<dyn EngineProbe>,
    config: WatchdogConfig,
    recover: mpsc::Sender<RecoveryRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog = Watchdog::new(config, Instant::now());

        info!("Watchdog started ({}ms interval)", config.interval.as_millis());

        loop {
            ticker.tick().await;
            let obs = Observation::read(probe.as_ref());
            let Some(kind) = watchdog.evaluate(obs, Instant::now()) else {
                continue;
            };

            warn!(
                "Playback stalled ({}) at {} ms, requesting recovery",
                kind, obs.position_ms
            );
            let request = RecoveryRequest {
                kind,
                position_ms: obs.position_ms,
            };
            match recover.try_send(request) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Recovery request dropped: controller busy");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Controller gone, watchdog exiting");
                    break;
                }
            }
        }
    })
}
