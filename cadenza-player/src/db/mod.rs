//! Database access layer
//!
//! SQLite-backed persistence for settings, the saved playback session, the
//! per-track resume map and the track library.

pub mod init;
pub mod library;
pub mod resume;
pub mod settings;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Open (creating if needed) the database file and ensure the schema exists
pub async fn open(path: &Path) -> Result<Pool<Sqlite>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    info!("Opened database at {}", path.display());
    init::initialize_database(&pool).await?;
    Ok(pool)
}

/// Open a private in-memory database with the schema applied
///
/// A single connection is used so every query sees the same memory database.
pub async fn open_in_memory() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init::initialize_database(&pool).await?;
    Ok(pool)
}
