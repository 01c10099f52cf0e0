//! Clock-driven engine used by the headless daemon and the tests
//!
//! Position advances with the tokio clock while the engine is ready and
//! asked to play, so paused-clock tests can drive whole tracks in
//! microseconds. Natural end of track is a timer that emits
//! [`EngineEvent::Ended`]. [`EngineFaults`] injects the failure classes the
//! orchestrator has to survive.

use super::{EngineEvent, EngineProbe, EngineStatus, PlaybackEngine};
use crate::error::{Error, Result, SourceErrorKind};
use crate::library::Track;
use cadenza_common::events::TrackId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug)]
struct SimState {
    track_id: Option<TrackId>,
    duration_ms: u64,
    status: EngineStatus,
    play_when_ready: bool,
    /// Position at `anchor`
    base_position_ms: u64,
    /// Set while the position is advancing
    anchor: Option<Instant>,
    volume: f32,
    /// Bumped on every change that invalidates a pending end timer
    generation: u64,
    stalled: bool,
    broken: HashMap<TrackId, SourceErrorKind>,
    failing_prepares: u32,
}

impl SimState {
    fn new() -> Self {
        Self {
            track_id: None,
            duration_ms: 0,
            status: EngineStatus::Idle,
            play_when_ready: false,
            base_position_ms: 0,
            anchor: None,
            volume: 1.0,
            generation: 0,
            stalled: false,
            broken: HashMap::new(),
            failing_prepares: 0,
        }
    }

    fn running(&self) -> bool {
        self.status == EngineStatus::Ready && self.play_when_ready && !self.stalled
    }

    fn position_ms(&self) -> u64 {
        let mut pos = self.base_position_ms;
        if let Some(anchor) = self.anchor {
            pos += cadenza_common::time::duration_to_millis(anchor.elapsed());
        }
        if self.duration_ms > 0 {
            pos.min(self.duration_ms)
        } else {
            pos
        }
    }

    /// Re-base the position on the current instant and (re)start the clock
    /// if the engine is running
    fn rebase(&mut self) {
        self.base_position_ms = self.position_ms();
        self.anchor = self.running().then(Instant::now);
        self.generation += 1;
    }
}

struct Shared {
    state: Mutex<SimState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A poisoned lock only means a test panicked mid-update; keep serving state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Read-only handle onto a [`SimulatedEngine`]
#[derive(Clone)]
pub struct SimulatedProbe {
    shared: Arc<Shared>,
}

impl EngineProbe for SimulatedProbe {
    fn position_ms(&self) -> u64 {
        self.shared.lock().position_ms()
    }

    fn duration_ms(&self) -> u64 {
        self.shared.lock().duration_ms
    }

    fn status(&self) -> EngineStatus {
        self.shared.lock().status
    }

    fn play_when_ready(&self) -> bool {
        self.shared.lock().play_when_ready
    }

    fn volume(&self) -> f32 {
        self.shared.lock().volume
    }
}

/// Failure injection for a [`SimulatedEngine`]
#[derive(Clone)]
pub struct EngineFaults {
    shared: Arc<Shared>,
}

impl EngineFaults {
    /// Make `prepare` of this track report a source error
    pub fn break_track(&self, id: TrackId, kind: SourceErrorKind) {
        self.shared.lock().broken.insert(id, kind);
    }

    /// Freeze the position while still reporting ready-and-playing
    ///
    /// Cleared by the next `prepare`.
    pub fn stall(&self) {
        let mut state = self.shared.lock();
        state.stalled = true;
        state.rebase();
        debug!("Simulated engine stalled at {} ms", state.base_position_ms);
    }

    /// Report buffering with a frozen position until the next `prepare`
    pub fn start_buffering(&self) {
        let mut state = self.shared.lock();
        state.status = EngineStatus::Buffering;
        state.stalled = true;
        state.rebase();
    }

    /// Make the next `count` prepare calls fail
    pub fn fail_prepares(&self, count: u32) {
        self.shared.lock().failing_prepares = count;
    }

    pub fn is_stalled(&self) -> bool {
        self.shared.lock().stalled
    }
}

/// Clock-driven [`PlaybackEngine`]
pub struct SimulatedEngine {
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<EngineEvent>,
    end_timer: Option<JoinHandle<()>>,
    /// Locator of the loaded track, for log lines only
    locator: Option<String>,
}

impl SimulatedEngine {
    /// Create an engine and the receiver its events arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState::new()),
            }),
            events,
            end_timer: None,
            locator: None,
        };
        (engine, rx)
    }

    pub fn faults(&self) -> EngineFaults {
        EngineFaults {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn simulated_probe(&self) -> SimulatedProbe {
        SimulatedProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn emit(&self, event: EngineEvent) {
        trace!("Simulated engine event: {:?}", event);
        let _ = self.events.send(event);
    }

    /// Restart the end-of-track timer for the current generation
    fn reschedule_end(&mut self) {
        if let Some(timer) = self.end_timer.take() {
            timer.abort();
        }

        let (generation, remaining) = {
            let state = self.shared.lock();
            if !state.running() || state.duration_ms == 0 {
                return;
            }
            (
                state.generation,
                state.duration_ms.saturating_sub(state.position_ms()),
            )
        };

        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        self.end_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(cadenza_common::time::millis_to_duration(remaining)).await;
            {
                let mut state = shared.lock();
                if state.generation != generation || !state.running() {
                    return;
                }
                state.base_position_ms = state.duration_ms;
                state.anchor = None;
                state.status = EngineStatus::Ended;
                state.generation += 1;
            }
            let _ = events.send(EngineEvent::Ended);
        }));
    }
}

impl PlaybackEngine for SimulatedEngine {
    fn load(&mut self, track: &Track) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.track_id = Some(track.id);
            state.duration_ms = track.duration_ms;
            state.status = EngineStatus::Idle;
            state.base_position_ms = 0;
            state.anchor = None;
            state.stalled = false;
            state.rebase();
        }
        self.locator = Some(track.locator.clone());
        debug!("Simulated engine loaded {}", track.locator);
        self.reschedule_end();
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let outcome = {
            let mut state = self.shared.lock();
            let track_id = state
                .track_id
                .ok_or_else(|| Error::Engine("prepare without a loaded track".to_string()))?;

            if state.failing_prepares > 0 {
                state.failing_prepares -= 1;
                return Err(Error::Engine("simulated prepare failure".to_string()));
            }

            match state.broken.get(&track_id).copied() {
                Some(kind) => {
                    state.status = EngineStatus::Idle;
                    state.rebase();
                    EngineEvent::SourceError { kind }
                }
                None => {
                    state.stalled = false;
                    if state.status != EngineStatus::Ended {
                        state.status = EngineStatus::Ready;
                    }
                    state.rebase();
                    EngineEvent::Ready
                }
            }
        };
        self.emit(outcome);
        self.reschedule_end();
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.play_when_ready = true;
            state.rebase();
        }
        self.emit(EngineEvent::PlayingChanged(true));
        self.reschedule_end();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.play_when_ready = false;
            state.rebase();
        }
        self.emit(EngineEvent::PlayingChanged(false));
        self.reschedule_end();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.status = EngineStatus::Idle;
            state.play_when_ready = false;
            state.rebase();
        }
        if let Some(locator) = &self.locator {
            debug!("Simulated engine stopped {}", locator);
        }
        self.reschedule_end();
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.base_position_ms = if state.duration_ms > 0 {
                position_ms.min(state.duration_ms)
            } else {
                position_ms
            };
            state.anchor = None;
            if state.status == EngineStatus::Ended {
                state.status = EngineStatus::Ready;
            }
            state.rebase();
        }
        self.reschedule_end();
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.shared.lock().volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    fn probe(&self) -> Arc<dyn EngineProbe> {
        Arc::new(self.simulated_probe())
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        if let Some(timer) = self.end_timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn track(id: TrackId, duration_ms: u64) -> Track {
        Track {
            id,
            locator: format!("/sim/{}.ogg", id),
            title: format!("Sim {}", id),
            duration_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_advances_only_while_playing() {
        let (mut engine, mut rx) = SimulatedEngine::new();
        let probe = engine.probe();
        engine.load(&track(1, 60_000)).unwrap();
        engine.prepare().unwrap();
        assert_eq!(rx.recv().await, Some(EngineEvent::Ready));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(probe.position_ms(), 0);

        engine.play().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(probe.position_ms(), 2000);
        assert!(probe.is_playing());

        engine.pause().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(probe.position_ms(), 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_emitted_at_duration() {
        let (mut engine, mut rx) = SimulatedEngine::new();
        let probe = engine.probe();
        engine.load(&track(1, 10_000)).unwrap();
        engine.prepare().unwrap();
        engine.seek(8_000).unwrap();
        engine.play().unwrap();

        assert_eq!(rx.recv().await, Some(EngineEvent::Ready));
        assert_eq!(rx.recv().await, Some(EngineEvent::PlayingChanged(true)));
        assert_eq!(rx.recv().await, Some(EngineEvent::Ended));
        assert_eq!(probe.status(), EngineStatus::Ended);
        assert_eq!(probe.position_ms(), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_track_reports_source_error() {
        let (mut engine, mut rx) = SimulatedEngine::new();
        engine.faults().break_track(3, SourceErrorKind::Decode);
        engine.load(&track(3, 10_000)).unwrap();
        engine.prepare().unwrap();

        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::SourceError {
                kind: SourceErrorKind::Decode
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_freezes_until_prepare() {
        let (mut engine, _rx) = SimulatedEngine::new();
        let faults = engine.faults();
        let probe = engine.probe();
        engine.load(&track(1, 60_000)).unwrap();
        engine.prepare().unwrap();
        engine.play().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        faults.stall();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(probe.position_ms(), 1000);
        assert!(probe.is_playing());

        faults.fail_prepares(1);
        assert!(engine.prepare().is_err());
        assert!(faults.is_stalled());

        engine.prepare().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.position_ms(), 2000);
    }
}
