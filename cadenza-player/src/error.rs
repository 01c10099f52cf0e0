//! Error types for cadenza-player
//!
//! One enum covers every failure class of the orchestration core. None of
//! them is allowed to take the process down: callers log and degrade.

use cadenza_common::events::TrackId;
use thiserror::Error;

/// Why a track's source could not be played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// File or content locator no longer exists
    Missing,
    /// Decoder rejected the data
    Decode,
    /// Streamed source answered with a bad status
    BadStatus,
}

impl std::fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceErrorKind::Missing => "source missing",
            SourceErrorKind::Decode => "decode failure",
            SourceErrorKind::BadStatus => "bad source status",
        };
        f.write_str(s)
    }
}

/// Main error type for cadenza-player
#[derive(Error, Debug)]
pub enum Error {
    /// Bootstrap configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Persisted value could not be decoded
    #[error("Corrupt persisted value for '{key}': {reason}")]
    CorruptSetting { key: String, reason: String },

    /// Engine refused or failed an operation
    #[error("Engine error: {0}")]
    Engine(String),

    /// Track source could not be played
    #[error("Source error for track {track_id}: {kind}")]
    Source {
        track_id: TrackId,
        kind: SourceErrorKind,
    },

    /// Output routing backend failure
    #[error("Routing error: {0}")]
    Route(String),

    /// Queue operation rejected
    #[error("Queue error: {0}")]
    Queue(String),

    /// Track id unknown to the library
    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Orchestrator is shutting down or a task is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] cadenza_common::Error),
}

/// Convenience Result type using cadenza-player Error
pub type Result<T> = std::result::Result<T, Error>;
