//! Event types for the Cadenza event system
//!
//! Provides the outbound event definitions and the `EventBus` every
//! presentation surface subscribes to.
//!
//! # Architecture
//!
//! - **EventBus** (tokio::broadcast): one-to-many outbound events
//! - **Command channels** (tokio::mpsc): surface/OS request → controller
//! - **Snapshot cache** (tokio::watch): latest authoritative snapshot

mod playback_types;
mod shared_types;

pub use playback_types::{OutputClass, PlaybackPhase, RepeatMode, TrackId};
pub use shared_types::PlaybackSnapshot;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Kind of transient, non-blocking notice shown to the user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// A track could not be played and was removed from the library
    TrackSkipped,
    /// Output was forced back to the built-in speaker by routing policy
    SpeakerForced,
}

/// Outbound player events
///
/// Each event carries enough of the snapshot for a surface to redraw without
/// querying the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Current track changed (load, skip, auto-advance, restore)
    TrackChanged {
        snapshot: PlaybackSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Play/pause state or controller phase changed
    PlayStateChanged {
        is_playing: bool,
        phase: PlaybackPhase,
        snapshot: PlaybackSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Shuffle toggled; `snapshot.queue` holds the new effective order
    ShuffleChanged {
        shuffle: bool,
        snapshot: PlaybackSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Repeat mode cycled
    RepeatChanged {
        repeat: RepeatMode,
        snapshot: PlaybackSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents changed without a track change (enqueue, removal)
    QueueChanged {
        queue: Vec<TrackId>,
        current_index: Option<usize>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic position refresh
    ///
    /// Emitted by the surface refresh loop; lossy by nature.
    PlaybackProgress {
        track_id: Option<TrackId>,
        position_ms: u64,
        duration_ms: u64,
        is_playing: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// User master volume changed
    VolumeChanged {
        volume: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Favorite flag toggled for a track
    FavoriteChanged {
        track_id: TrackId,
        favorite: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A saved resume point exists for the track that was just loaded
    ///
    /// Playback is held paused until the prompt is answered.
    ResumePrompt {
        track_id: TrackId,
        position_ms: u64,
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Transient notice for the user
    Notice {
        kind: NoticeKind,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Active output route changed
    RouteChanged {
        output: OutputClass,
        forced_speaker: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Screen turned on while playing; lock-screen surface should show itself
    ShowLockScreen {
        snapshot: PlaybackSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Event type name (used as the SSE `event:` field)
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::TrackChanged { .. } => "TrackChanged",
            PlayerEvent::PlayStateChanged { .. } => "PlayStateChanged",
            PlayerEvent::ShuffleChanged { .. } => "ShuffleChanged",
            PlayerEvent::RepeatChanged { .. } => "RepeatChanged",
            PlayerEvent::QueueChanged { .. } => "QueueChanged",
            PlayerEvent::PlaybackProgress { .. } => "PlaybackProgress",
            PlayerEvent::VolumeChanged { .. } => "VolumeChanged",
            PlayerEvent::FavoriteChanged { .. } => "FavoriteChanged",
            PlayerEvent::ResumePrompt { .. } => "ResumePrompt",
            PlayerEvent::Notice { .. } => "Notice",
            PlayerEvent::RouteChanged { .. } => "RouteChanged",
            PlayerEvent::ShowLockScreen { .. } => "ShowLockScreen",
        }
    }

    /// Snapshot carried by the event, if any
    pub fn snapshot(&self) -> Option<&PlaybackSnapshot> {
        match self {
            PlayerEvent::TrackChanged { snapshot, .. }
            | PlayerEvent::PlayStateChanged { snapshot, .. }
            | PlayerEvent::ShuffleChanged { snapshot, .. }
            | PlayerEvent::RepeatChanged { snapshot, .. }
            | PlayerEvent::ShowLockScreen { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

/// Event bus for one-to-many event distribution
///
/// Wraps a tokio broadcast channel. Slow subscribers lag and lose the oldest
/// events instead of blocking the publisher.
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use cadenza_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
