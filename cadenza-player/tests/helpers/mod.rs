//! Test player wrapper for integration tests
//!
//! Starts a full orchestrator over the simulated engine and a memory library,
//! with event monitoring helpers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadenza_common::events::{PlayerEvent, TrackId};
use cadenza_player::config::RuntimeSettings;
use cadenza_player::engine::simulated::SimulatedProbe;
use cadenza_player::engine::{EngineFaults, SimulatedEngine};
use cadenza_player::error::Result;
use cadenza_player::library::{MemoryLibrary, Track};
use cadenza_player::playback::Command;
use cadenza_player::routing::AudioRouter;
use cadenza_player::{Orchestrator, OrchestratorHandle, OrchestratorParts};
use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast;

pub const SHUFFLE_SEED: u64 = 7;

pub fn track(id: TrackId, seconds: u64) -> Track {
    Track {
        id,
        locator: format!("/music/track_{id}.flac"),
        title: format!("Track {id}"),
        duration_ms: seconds * 1000,
    }
}

/// Router that records every call
#[derive(Clone, Default)]
pub struct RecordingRouter {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingRouter {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl AudioRouter for RecordingRouter {
    fn disable_wireless_link(&mut self) -> Result<()> {
        self.record("disable_wireless_link")
    }
    fn set_normal_mode(&mut self) -> Result<()> {
        self.record("set_normal_mode")
    }
    fn enable_speaker(&mut self, _on: bool) -> Result<()> {
        self.record("enable_speaker")
    }
    fn reset_routing(&mut self) -> Result<()> {
        self.record("reset_routing")
    }
}

/// Orchestrator instance with its test hooks
pub struct TestPlayer {
    pub orchestrator: Orchestrator,
    pub handle: OrchestratorHandle,
    pub faults: EngineFaults,
    pub probe: SimulatedProbe,
    pub library: Arc<MemoryLibrary>,
    pub router: RecordingRouter,
    pub events: broadcast::Receiver<PlayerEvent>,
}

impl TestPlayer {
    pub async fn start(
        db: Pool<Sqlite>,
        settings: RuntimeSettings,
        tracks: impl IntoIterator<Item = Track>,
    ) -> Self {
        let library = Arc::new(MemoryLibrary::with_tracks(tracks));
        let (engine, engine_events) = SimulatedEngine::new();
        let faults = engine.faults();
        let probe = engine.simulated_probe();
        let router = RecordingRouter::default();

        let orchestrator = Orchestrator::start(OrchestratorParts {
            db,
            settings,
            library: library.clone(),
            engine: Box::new(engine),
            engine_events,
            router: router.clone(),
            shuffle_seed: Some(SHUFFLE_SEED),
        })
        .await;
        let handle = orchestrator.handle();
        let events = handle.subscribe();

        Self {
            orchestrator,
            handle,
            faults,
            probe,
            library,
            router,
            events,
        }
    }

    pub async fn send(&self, command: Command) {
        self.handle.send(command).await.unwrap();
    }

    /// Wait for the first event matching `pred`, skipping others
    pub async fn wait_for<F>(&mut self, what: &str, mut pred: F) -> PlayerEvent
    where
        F: FnMut(&PlayerEvent) -> bool,
    {
        let deadline = Duration::from_secs(600);
        let result = tokio::time::timeout(deadline, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event bus closed while waiting for {what}: {e}"),
                }
            }
        })
        .await;
        result.unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    pub async fn wait_for_track(&mut self, id: TrackId) -> PlayerEvent {
        self.wait_for("TrackChanged", |e| {
            matches!(e, PlayerEvent::TrackChanged { snapshot, .. } if snapshot.track_id == Some(id))
        })
        .await
    }

    pub async fn wait_for_playing(&mut self, playing: bool) -> PlayerEvent {
        self.wait_for("PlayStateChanged", |e| {
            matches!(e, PlayerEvent::PlayStateChanged { is_playing, .. } if *is_playing == playing)
        })
        .await
    }

    /// Drain everything currently buffered on the bus
    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
