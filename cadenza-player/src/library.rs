//! Track library collaborator
//!
//! The controller only needs three things from the library: resolve a track
//! id to something playable, drop a track whose source is broken, and flip the
//! favorite flag. Everything else about the library (scanning, tagging,
//! playlists) lives outside the orchestrator.

use crate::db;
use crate::error::Result;
use cadenza_common::events::TrackId;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, warn};

/// A playable library entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// File path or content locator
    pub locator: String,
    pub title: String,
    /// Duration in milliseconds, 0 when unknown
    pub duration_ms: u64,
}

/// Library operations used by the playback controller
pub trait Library: Send + Sync {
    /// Look up a track by id
    fn resolve(&self, id: TrackId) -> Option<Track>;

    /// Remove a track from the caller-visible library
    ///
    /// Returns false if the track was not present.
    fn remove(&self, id: TrackId) -> bool;

    /// Flip the favorite flag, returning the new value
    fn toggle_favorite(&self, id: TrackId) -> Option<bool>;

    fn is_favorite(&self, id: TrackId) -> bool;
}

#[derive(Default)]
struct LibraryState {
    tracks: HashMap<TrackId, Track>,
    favorites: HashSet<TrackId>,
}

/// Library held entirely in memory
#[derive(Default)]
pub struct MemoryLibrary {
    state: RwLock<LibraryState>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a library from a list of tracks
    pub fn with_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let library = Self::new();
        for track in tracks {
            library.insert(track);
        }
        library
    }

    pub fn insert(&self, track: Track) {
        if let Ok(mut state) = self.state.write() {
            state.tracks.insert(track.id, track);
        }
    }

    fn set_favorite(&self, id: TrackId, favorite: bool) {
        if let Ok(mut state) = self.state.write() {
            if favorite {
                state.favorites.insert(id);
            } else {
                state.favorites.remove(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.tracks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Library for MemoryLibrary {
    fn resolve(&self, id: TrackId) -> Option<Track> {
        self.state.read().ok()?.tracks.get(&id).cloned()
    }

    fn remove(&self, id: TrackId) -> bool {
        match self.state.write() {
            Ok(mut state) => {
                state.favorites.remove(&id);
                state.tracks.remove(&id).is_some()
            }
            Err(_) => false,
        }
    }

    fn toggle_favorite(&self, id: TrackId) -> Option<bool> {
        let mut state = self.state.write().ok()?;
        if !state.tracks.contains_key(&id) {
            return None;
        }
        if state.favorites.remove(&id) {
            Some(false)
        } else {
            state.favorites.insert(id);
            Some(true)
        }
    }

    fn is_favorite(&self, id: TrackId) -> bool {
        self.state
            .read()
            .map(|s| s.favorites.contains(&id))
            .unwrap_or(false)
    }
}

/// Library backed by the `tracks` table
///
/// Reads are served from an in-memory cache loaded at startup. Writes update
/// the cache immediately and are written through to SQLite in the background;
/// a failed write is logged and leaves the table stale.
pub struct SqliteLibrary {
    cache: MemoryLibrary,
    db: Pool<Sqlite>,
}

impl SqliteLibrary {
    pub async fn load(db: Pool<Sqlite>) -> Result<Self> {
        let cache = MemoryLibrary::new();
        for (track, favorite) in db::library::load_tracks(&db).await? {
            let id = track.id;
            cache.insert(track);
            if favorite {
                cache.set_favorite(id, true);
            }
        }
        debug!("Loaded {} library tracks", cache.len());
        Ok(Self { cache, db })
    }

    /// Add or replace a track, waiting for the write
    pub async fn add(&self, track: Track) -> Result<()> {
        db::library::upsert_track(&self.db, &track).await?;
        self.cache.insert(track);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn write_through<F, Fut>(&self, what: &'static str, write: F)
    where
        F: FnOnce(Pool<Sqlite>) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let fut = write(self.db.clone());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = fut.await {
                        warn!("Library {} write failed: {}", what, e);
                    }
                });
            }
            Err(_) => warn!("Library {} not persisted: no runtime", what),
        }
    }
}

impl Library for SqliteLibrary {
    fn resolve(&self, id: TrackId) -> Option<Track> {
        self.cache.resolve(id)
    }

    fn remove(&self, id: TrackId) -> bool {
        let removed = self.cache.remove(id);
        if removed {
            self.write_through("removal", move |db| async move {
                db::library::delete_track(&db, id).await
            });
        }
        removed
    }

    fn toggle_favorite(&self, id: TrackId) -> Option<bool> {
        let favorite = self.cache.toggle_favorite(id)?;
        self.write_through("favorite", move |db| async move {
            db::library::set_favorite(&db, id, favorite).await
        });
        Some(favorite)
    }

    fn is_favorite(&self, id: TrackId) -> bool {
        self.cache.is_favorite(id)
    }
}
