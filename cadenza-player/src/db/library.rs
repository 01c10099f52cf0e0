//! Track library table access

use crate::error::Result;
use crate::library::Track;
use cadenza_common::events::TrackId;
use sqlx::{Pool, Sqlite};

/// Load every library track
pub async fn load_tracks(db: &Pool<Sqlite>) -> Result<Vec<(Track, bool)>> {
    let rows: Vec<(i64, String, String, i64, i64)> = sqlx::query_as(
        "SELECT id, locator, title, duration_ms, favorite FROM tracks ORDER BY id",
    )
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, locator, title, duration_ms, favorite)| {
            (
                Track {
                    id,
                    locator,
                    title,
                    duration_ms: duration_ms.max(0) as u64,
                },
                favorite != 0,
            )
        })
        .collect())
}

/// Insert or replace a track
pub async fn upsert_track(db: &Pool<Sqlite>, track: &Track) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracks (id, locator, title, duration_ms)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE
            SET locator = excluded.locator,
                title = excluded.title,
                duration_ms = excluded.duration_ms
        "#,
    )
    .bind(track.id)
    .bind(&track.locator)
    .bind(&track.title)
    .bind(track.duration_ms as i64)
    .execute(db)
    .await?;
    Ok(())
}

/// Remove a track from the library
pub async fn delete_track(db: &Pool<Sqlite>, id: TrackId) -> Result<()> {
    sqlx::query("DELETE FROM tracks WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Persist a track's favorite flag
pub async fn set_favorite(db: &Pool<Sqlite>, id: TrackId, favorite: bool) -> Result<()> {
    sqlx::query("UPDATE tracks SET favorite = ? WHERE id = ?")
        .bind(favorite as i64)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn track(id: TrackId) -> Track {
        Track {
            id,
            locator: format!("/music/{}.flac", id),
            title: format!("Track {}", id),
            duration_ms: 180_000,
        }
    }

    #[tokio::test]
    async fn test_track_lifecycle() {
        let pool = open_in_memory().await.unwrap();
        upsert_track(&pool, &track(1)).await.unwrap();
        upsert_track(&pool, &track(2)).await.unwrap();
        set_favorite(&pool, 2, true).await.unwrap();
        delete_track(&pool, 1).await.unwrap();

        let tracks = load_tracks(&pool).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].0, track(2));
        assert!(tracks[0].1);
    }
}
