//! Surface that renders to the log
//!
//! Used by the headless daemon so every surface kind has a live consumer.

use super::{Surface, SurfaceKind, SurfaceUpdate};
use cadenza_common::time::format_position;
use tracing::{debug, info};

pub struct LoggingSurface {
    kind: SurfaceKind,
}

impl LoggingSurface {
    pub fn new(kind: SurfaceKind) -> Self {
        Self { kind }
    }
}

impl Surface for LoggingSurface {
    fn kind(&self) -> SurfaceKind {
        self.kind
    }

    fn render(&mut self, update: &SurfaceUpdate) {
        let s = update.snapshot();
        match update {
            SurfaceUpdate::Changed { event, .. } => info!(
                "[{}] {}: track={:?} {} {}/{}",
                self.kind,
                event.event_type(),
                s.track_id,
                s.phase,
                format_position(s.position_ms),
                format_position(s.duration_ms)
            ),
            SurfaceUpdate::Refresh { .. } => debug!(
                "[{}] {}/{}",
                self.kind,
                format_position(s.position_ms),
                format_position(s.duration_ms)
            ),
        }
    }
}
