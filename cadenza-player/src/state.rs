//! Cached playback snapshot shared with readers
//!
//! There is exactly one [`SnapshotCache`] (held by the surface synchronizer)
//! and any number of [`SnapshotView`]s. Views can read and await changes but
//! have no way to write.

use cadenza_common::events::PlaybackSnapshot;
use tokio::sync::watch;

/// Single-writer snapshot cache
#[derive(Debug)]
pub struct SnapshotCache {
    tx: watch::Sender<PlaybackSnapshot>,
}

impl SnapshotCache {
    pub fn new(initial: PlaybackSnapshot) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the cached snapshot
    pub fn replace(&self, snapshot: PlaybackSnapshot) {
        self.tx.send_replace(snapshot);
    }

    /// Update position fields only, without waking readers for no-op updates
    pub fn update_position(&self, position_ms: u64, duration_ms: u64) {
        self.tx.send_if_modified(|s| {
            let changed = s.position_ms != position_ms || s.duration_ms != duration_ms;
            s.position_ms = position_ms;
            s.duration_ms = duration_ms;
            changed
        });
    }

    pub fn get(&self) -> PlaybackSnapshot {
        self.tx.borrow().clone()
    }

    pub fn view(&self) -> SnapshotView {
        SnapshotView {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only handle onto the snapshot cache
#[derive(Debug, Clone)]
pub struct SnapshotView {
    rx: watch::Receiver<PlaybackSnapshot>,
}

impl SnapshotView {
    pub fn get(&self) -> PlaybackSnapshot {
        self.rx.borrow().clone()
    }

    pub fn is_playing(&self) -> bool {
        self.rx.borrow().is_playing
    }

    /// Wait until the snapshot changes
    ///
    /// Returns false once the cache is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
