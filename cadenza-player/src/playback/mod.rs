//! Playback core
//!
//! - [`controller`]: command/state machine, sole owner of the engine
//! - [`queue`]: original and shuffled play order
//! - [`fader`]: single-job volume fade scheduler
//! - [`watchdog`]: stall detection
//! - [`persistence`]: resume index and session writes

pub mod controller;
pub mod fader;
pub mod persistence;
pub mod queue;
pub mod watchdog;

pub use controller::{
    Command, CommandSender, ControlMessage, Controller, ControllerChannels, ControllerParts,
};
pub use persistence::PersistenceManager;
pub use queue::PlayQueue;
pub use watchdog::{RecoveryRequest, StallKind};
