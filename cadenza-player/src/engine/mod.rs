//! Playback engine abstraction
//!
//! The engine decodes and renders audio; the orchestrator only drives it.
//! Mutating calls go through [`PlaybackEngine`], which is owned exclusively
//! by the controller task. Background samplers (watchdog, surface refresh)
//! get an [`EngineProbe`] with read-only access.
//!
//! Engine callbacks are delivered as [`EngineEvent`]s on an mpsc channel the
//! controller drains in its own loop, so there is a single ingestion point
//! for engine state changes.

pub mod simulated;

pub use simulated::{EngineFaults, SimulatedEngine};

use crate::error::{Result, SourceErrorKind};
use crate::library::Track;
use std::sync::Arc;

/// Engine readiness as reported to samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Nothing prepared
    Idle,
    /// Waiting for data
    Buffering,
    /// Prepared; renders audio while `play_when_ready` is set
    Ready,
    /// Reached the end of the loaded track
    Ended,
}

/// Engine callbacks, delivered in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Ready,
    Buffering,
    PlayingChanged(bool),
    /// Natural end of the loaded track
    Ended,
    /// Loaded track cannot be played
    SourceError { kind: SourceErrorKind },
}

/// Read-only view of engine state
pub trait EngineProbe: Send + Sync {
    fn position_ms(&self) -> u64;

    /// Duration of the loaded track (0 when unknown)
    fn duration_ms(&self) -> u64;

    fn status(&self) -> EngineStatus;

    /// Whether the engine will render as soon as it is ready
    fn play_when_ready(&self) -> bool;

    fn volume(&self) -> f32;

    fn is_playing(&self) -> bool {
        self.status() == EngineStatus::Ready && self.play_when_ready()
    }
}

/// Mutating engine operations
///
/// Only the controller holds this; every call is made from its task.
pub trait PlaybackEngine: Send {
    /// Hand a track to the engine; it is not prepared yet
    fn load(&mut self, track: &Track) -> Result<()>;

    /// Prepare the loaded track; `Ready` or `SourceError` follows as an event
    fn prepare(&mut self) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Release the loaded track's resources
    fn stop(&mut self) -> Result<()>;

    fn seek(&mut self, position_ms: u64) -> Result<()>;

    /// Set output volume; values are clamped to `[0.0, 1.0]`
    fn set_volume(&mut self, volume: f32) -> Result<()>;

    fn probe(&self) -> Arc<dyn EngineProbe>;
}
