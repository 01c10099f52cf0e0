//! Playback-related type definitions
//!
//! Supporting types for the playback snapshot and controller state machine.

use serde::{Deserialize, Serialize};

/// Library track identifier
pub type TrackId = i64;

/// Repeat behaviour applied when the queue reaches its end
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Halt after the last queue entry
    #[default]
    Off,
    /// Restart the queue from the first entry
    All,
    /// Reload the current track
    One,
}

impl RepeatMode {
    /// Next mode in the toggle cycle: off → all → one → off
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }

    /// Parse from the persisted representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" => Some(RepeatMode::Off),
            "all" => Some(RepeatMode::All),
            "one" => Some(RepeatMode::One),
            _ => None,
        }
    }

    /// Persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "all",
            RepeatMode::One => "one",
        }
    }
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller state machine phase
///
/// `Idle → Loading → Ready ⇄ Playing/Paused → Ended`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    /// Nothing loaded
    #[default]
    Idle,
    /// Track handed to the engine, waiting for it to become ready
    Loading,
    /// Track loaded and positioned, not yet started
    Ready,
    /// Audio is being rendered
    Playing,
    /// Playback paused by the user or a collaborator
    Paused,
    /// Queue exhausted without repeat
    Ended,
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlaybackPhase::Idle => "idle",
            PlaybackPhase::Loading => "loading",
            PlaybackPhase::Ready => "ready",
            PlaybackPhase::Playing => "playing",
            PlaybackPhase::Paused => "paused",
            PlaybackPhase::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Physical audio output class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputClass {
    /// Built-in speaker
    #[default]
    Speaker,
    /// Wired headphones or line out
    Wired,
    /// Wireless (Bluetooth) audio link
    Wireless,
}

impl std::fmt::Display for OutputClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutputClass::Speaker => "speaker",
            OutputClass::Wired => "wired",
            OutputClass::Wireless => "wireless",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_cycle_returns_to_off() {
        let mode = RepeatMode::Off.cycled().cycled().cycled();
        assert_eq!(mode, RepeatMode::Off);
        assert_eq!(RepeatMode::Off.cycled(), RepeatMode::All);
        assert_eq!(RepeatMode::All.cycled(), RepeatMode::One);
    }

    #[test]
    fn test_repeat_parse() {
        assert_eq!(RepeatMode::parse("ALL"), Some(RepeatMode::All));
        assert_eq!(RepeatMode::parse(" one "), Some(RepeatMode::One));
        assert_eq!(RepeatMode::parse("sometimes"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&OutputClass::Wireless).unwrap();
        assert_eq!(json, "\"wireless\"");
        let phase: PlaybackPhase = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(phase, PlaybackPhase::Paused);
    }
}
