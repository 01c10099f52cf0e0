//! # Cadenza Common Library
//!
//! Shared code for the Cadenza playback orchestrator:
//! - Event types (`PlayerEvent`) and the broadcast `EventBus`
//! - Playback vocabulary (track ids, repeat mode, output classes)
//! - Bootstrap configuration loading
//! - Fade curve definitions
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod time;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
