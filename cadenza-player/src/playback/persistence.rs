//! Resume position and session persistence
//!
//! The [`ResumeIndex`] lives in memory and records which entries changed.
//! [`PersistenceManager::persist`] hands the changes plus the latest session
//! to a writer task and returns immediately; [`PersistenceManager::flush`]
//! does the same but waits for the write, which is what teardown uses.
//! Write failures are logged and otherwise ignored: a failed save leaves stale
//! resume data, never corrupt data.

use crate::db;
use crate::db::settings::SavedSession;
use crate::error::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Distance from either end of a track inside which no resume point is kept
pub const RESUME_EDGE_MS: u64 = 5000;

/// Whether `position_ms` is worth resuming from
///
/// Positions in the first or last five seconds are not: near the end the
/// track counts as finished.
pub fn in_resume_band(position_ms: u64, duration_ms: u64) -> bool {
    position_ms > RESUME_EDGE_MS && position_ms.saturating_add(RESUME_EDGE_MS) < duration_ms
}

/// Normalize a file path or content locator for use as a resume key
pub fn normalize_locator(locator: &str) -> String {
    let trimmed = locator.trim();
    let trimmed = trimmed.strip_prefix("file://").unwrap_or(trimmed);

    let (scheme, rest) = match trimmed.find("://") {
        Some(idx) => trimmed.split_at(idx + 3),
        None => ("", trimmed),
    };

    let mut out = String::with_capacity(trimmed.len());
    out.push_str(scheme);
    let mut prev_slash = false;
    for c in rest.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        out.push(c);
    }
    out
}

/// Track locator → last saved position
#[derive(Debug, Default)]
pub struct ResumeIndex {
    entries: HashMap<String, u64>,
    dirty: HashSet<String>,
}

impl ResumeIndex {
    pub fn from_entries(entries: HashMap<String, u64>) -> Self {
        Self {
            entries,
            dirty: HashSet::new(),
        }
    }

    /// Record a position, or clear the entry when it is outside the band
    ///
    /// Returns true if an entry was stored.
    pub fn save(&mut self, locator: &str, position_ms: u64, duration_ms: u64) -> bool {
        let key = normalize_locator(locator);
        if in_resume_band(position_ms, duration_ms) {
            if self.entries.insert(key.clone(), position_ms) != Some(position_ms) {
                self.dirty.insert(key);
            }
            true
        } else {
            if self.entries.remove(&key).is_some() {
                self.dirty.insert(key);
            }
            false
        }
    }

    pub fn clear(&mut self, locator: &str) {
        let key = normalize_locator(locator);
        if self.entries.remove(&key).is_some() {
            self.dirty.insert(key);
        }
    }

    pub fn get(&self, locator: &str) -> Option<u64> {
        self.entries.get(&normalize_locator(locator)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain pending changes as (upserts, deletes)
    pub fn take_changes(&mut self) -> (Vec<(String, u64)>, Vec<String>) {
        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        for key in self.dirty.drain() {
            match self.entries.get(&key) {
                Some(&pos) => upserts.push((key, pos)),
                None => deletes.push(key),
            }
        }
        (upserts, deletes)
    }
}

/// One unit of work for the writer task
#[derive(Debug, Default)]
struct WriteBatch {
    session: Option<SavedSession>,
    upserts: Vec<(String, u64)>,
    deletes: Vec<String>,
    settings: Vec<(String, String)>,
    done: Option<oneshot::Sender<Result<()>>>,
}

impl WriteBatch {
    fn is_empty(&self) -> bool {
        self.session.is_none()
            && self.upserts.is_empty()
            && self.deletes.is_empty()
            && self.settings.is_empty()
    }
}

async fn write_batch(db: &Pool<Sqlite>, batch: &WriteBatch) -> Result<()> {
    if let Some(session) = &batch.session {
        db::settings::save_session(db, session).await?;
    }
    db::resume::apply_changes(db, &batch.upserts, &batch.deletes).await?;
    for (key, value) in &batch.settings {
        db::settings::set_setting(db, key, value).await?;
    }
    Ok(())
}

async fn writer_loop(db: Pool<Sqlite>, mut rx: mpsc::UnboundedReceiver<WriteBatch>) {
    while let Some(mut batch) = rx.recv().await {
        let result = if batch.is_empty() {
            Ok(())
        } else {
            write_batch(&db, &batch).await
        };

        match batch.done.take() {
            Some(done) => {
                let _ = done.send(result);
            }
            None => match result {
                Ok(()) => debug!(
                    "Persisted {} resume updates, {} removals",
                    batch.upserts.len(),
                    batch.deletes.len()
                ),
                Err(e) => warn!("Background persist failed: {}", e),
            },
        }
    }
    debug!("Persistence writer stopped");
}

/// Owner of the resume index and the persisted session
pub struct PersistenceManager {
    index: ResumeIndex,
    pending_session: Option<SavedSession>,
    pending_settings: Vec<(String, String)>,
    /// `None` once closed
    writer: Option<mpsc::UnboundedSender<WriteBatch>>,
    task: Option<JoinHandle<()>>,
    db: Pool<Sqlite>,
}

impl PersistenceManager {
    /// Load the resume map and start the writer task
    ///
    /// A resume map that cannot be read starts empty.
    pub async fn start(db: Pool<Sqlite>) -> Self {
        let entries = match db::resume::load_positions(&db).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not load resume positions, starting empty: {}", e);
                HashMap::new()
            }
        };
        info!("Loaded {} resume positions", entries.len());

        let (writer, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(writer_loop(db.clone(), rx));

        Self {
            index: ResumeIndex::from_entries(entries),
            pending_session: None,
            pending_settings: Vec::new(),
            writer: Some(writer),
            task: Some(task),
            db,
        }
    }

    /// One-shot read of the saved session
    ///
    /// A corrupt or unreadable session is logged and treated as empty.
    pub async fn load_session(&self) -> SavedSession {
        match db::settings::load_session(&self.db).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Saved session unreadable, starting empty: {}", e);
                SavedSession::default()
            }
        }
    }

    pub fn save_progress(&mut self, locator: &str, position_ms: u64, duration_ms: u64) -> bool {
        self.index.save(locator, position_ms, duration_ms)
    }

    pub fn clear_position(&mut self, locator: &str) {
        self.index.clear(locator);
    }

    pub fn resume_position(&self, locator: &str) -> Option<u64> {
        self.index.get(locator)
    }

    /// Replace the session to be written by the next persist
    pub fn stage_session(&mut self, session: SavedSession) {
        self.pending_session = Some(session);
    }

    /// Queue a settings-table write for the next persist
    pub fn stage_setting(&mut self, key: &str, value: impl ToString) {
        self.pending_settings.push((key.to_string(), value.to_string()));
    }

    fn take_batch(&mut self) -> WriteBatch {
        let (upserts, deletes) = self.index.take_changes();
        WriteBatch {
            session: self.pending_session.take(),
            upserts,
            deletes,
            settings: std::mem::take(&mut self.pending_settings),
            done: None,
        }
    }

    /// Hand pending changes to the writer without waiting
    pub fn persist(&mut self) {
        let batch = self.take_batch();
        if batch.is_empty() {
            return;
        }
        let sent = self.writer.as_ref().map(|w| w.send(batch).is_ok());
        if sent != Some(true) {
            warn!("Persistence writer gone, dropping update");
        }
    }

    /// Write pending changes and wait until they (and everything queued
    /// before them) are stored
    pub async fn flush(&mut self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut batch = self.take_batch();
        batch.done = Some(done_tx);
        self.writer
            .as_ref()
            .ok_or(Error::ChannelClosed("persistence writer"))?
            .send(batch)
            .map_err(|_| Error::ChannelClosed("persistence writer"))?;
        done_rx
            .await
            .map_err(|_| Error::ChannelClosed("persistence writer"))?
    }

    /// Stop the writer task after draining queued writes
    pub async fn close(&mut self) {
        // Dropping the sender ends the writer loop once the queue is empty
        self.writer = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
