//! Settings database access
//!
//! Read/write values in the `settings` key-value table, including the saved
//! playback session restored on cold start.

use crate::error::{Error, Result};
use cadenza_common::events::{RepeatMode, TrackId};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub const KEY_LAST_TRACK_ID: &str = "last_track_id";
pub const KEY_LAST_POSITION_MS: &str = "last_position_ms";
pub const KEY_QUEUE_TRACK_IDS: &str = "queue_track_ids";
pub const KEY_SHUFFLE_ENABLED: &str = "shuffle_enabled";
pub const KEY_REPEAT_MODE: &str = "repeat_mode";

/// Playback session as persisted between runs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SavedSession {
    pub last_track_id: Option<TrackId>,
    pub last_position_ms: u64,
    /// Queue in original (unshuffled) order
    pub queue: Vec<TrackId>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
}

impl SavedSession {
    /// Whether there is anything to restore
    pub fn is_empty(&self) -> bool {
        self.last_track_id.is_none() && self.queue.is_empty()
    }
}

/// Generic setting getter
///
/// Returns `Ok(None)` for a missing key and `Error::CorruptSetting` when the
/// stored text does not parse as `T`.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::CorruptSetting {
                key: key.to_string(),
                reason: format!("unparseable value '{}'", s),
            }),
        },
        None => Ok(None),
    }
}

/// Generic setting setter (insert or update)
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Remove a setting
pub async fn delete_setting(db: &Pool<Sqlite>, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(db)
        .await?;
    Ok(())
}

/// Save the playback session atomically
pub async fn save_session(db: &Pool<Sqlite>, session: &SavedSession) -> Result<()> {
    let queue_json = serde_json::to_string(&session.queue).map_err(|e| Error::CorruptSetting {
        key: KEY_QUEUE_TRACK_IDS.to_string(),
        reason: e.to_string(),
    })?;

    let mut tx = db.begin().await?;
    let upsert = r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
    "#;

    match session.last_track_id {
        Some(id) => {
            sqlx::query(upsert)
                .bind(KEY_LAST_TRACK_ID)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        None => {
            sqlx::query("DELETE FROM settings WHERE key = ?")
                .bind(KEY_LAST_TRACK_ID)
                .execute(&mut *tx)
                .await?;
        }
    }

    for (key, value) in [
        (KEY_LAST_POSITION_MS, session.last_position_ms.to_string()),
        (KEY_QUEUE_TRACK_IDS, queue_json),
        (KEY_SHUFFLE_ENABLED, session.shuffle.to_string()),
        (KEY_REPEAT_MODE, session.repeat.as_str().to_string()),
    ] {
        sqlx::query(upsert).bind(key).bind(value).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load the saved playback session
///
/// Missing keys fall back to defaults; a corrupt queue or repeat value is an error
/// so the caller can decide to start empty.
pub async fn load_session(db: &Pool<Sqlite>) -> Result<SavedSession> {
    let last_track_id = get_setting::<TrackId>(db, KEY_LAST_TRACK_ID).await?;
    let last_position_ms = get_setting::<u64>(db, KEY_LAST_POSITION_MS)
        .await?
        .unwrap_or(0);
    let shuffle = get_setting::<bool>(db, KEY_SHUFFLE_ENABLED)
        .await?
        .unwrap_or(false);

    let repeat = match get_setting::<String>(db, KEY_REPEAT_MODE).await? {
        Some(s) => RepeatMode::parse(&s).ok_or_else(|| Error::CorruptSetting {
            key: KEY_REPEAT_MODE.to_string(),
            reason: format!("unknown repeat mode '{}'", s),
        })?,
        None => RepeatMode::Off,
    };

    let queue = match get_setting::<String>(db, KEY_QUEUE_TRACK_IDS).await? {
        Some(json) => {
            serde_json::from_str::<Vec<TrackId>>(&json).map_err(|e| Error::CorruptSetting {
                key: KEY_QUEUE_TRACK_IDS.to_string(),
                reason: e.to_string(),
            })?
        }
        None => Vec::new(),
    };

    Ok(SavedSession {
        last_track_id,
        last_position_ms,
        queue,
        shuffle,
        repeat,
    })
}
