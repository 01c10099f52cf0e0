//! Shared snapshot type carried by outbound events

use serde::{Deserialize, Serialize};

use super::playback_types::{PlaybackPhase, RepeatMode, TrackId};

/// The single authoritative playback state record
///
/// Written only by the playback controller; every other component and
/// every surface receives clones of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaybackSnapshot {
    /// Currently loaded track
    pub track_id: Option<TrackId>,
    /// Display title of the current track
    pub title: Option<String>,
    /// Queue in the order it was supplied
    pub original_queue: Vec<TrackId>,
    /// Queue in playback order (shuffled view when shuffle is on)
    pub queue: Vec<TrackId>,
    /// Index of the current track within `queue`
    pub current_index: Option<usize>,
    /// Playback position (milliseconds)
    pub position_ms: u64,
    /// Track duration (milliseconds, 0 when unknown)
    pub duration_ms: u64,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub is_playing: bool,
    /// User master volume (0.0-1.0); fades scale the engine output beneath it
    pub volume: f32,
    pub phase: PlaybackPhase,
    /// Whether the current track is marked favorite
    pub favorite: bool,
}
