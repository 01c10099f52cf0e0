//! # Cadenza Player
//!
//! Playback orchestration core: a single controller task owns the playback
//! engine and coordinates volume fades, stall recovery, output routing,
//! resume persistence and fan-out to presentation surfaces.
//!
//! The crate is a library; `main.rs` wires it to SQLite, the simulated engine
//! and an HTTP/SSE surface as a headless daemon.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod library;
pub mod orchestrator;
pub mod playback;
pub mod routing;
pub mod state;
pub mod surfaces;

pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorHandle, OrchestratorParts};
