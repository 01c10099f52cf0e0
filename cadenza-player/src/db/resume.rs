//! Per-track resume position table

use crate::error::Result;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;

/// Load every saved resume position, keyed by normalized locator
pub async fn load_positions(db: &Pool<Sqlite>) -> Result<HashMap<String, u64>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT locator, position_ms FROM resume_positions")
            .fetch_all(db)
            .await?;

    Ok(rows
        .into_iter()
        .filter(|(_, pos)| *pos > 0)
        .map(|(locator, pos)| (locator, pos as u64))
        .collect())
}

/// Apply a batch of upserts and deletions in one transaction
pub async fn apply_changes(
    db: &Pool<Sqlite>,
    upserts: &[(String, u64)],
    deletes: &[String],
) -> Result<()> {
    if upserts.is_empty() && deletes.is_empty() {
        return Ok(());
    }

    let mut tx = db.begin().await?;
    for (locator, position_ms) in upserts {
        sqlx::query(
            r#"
            INSERT INTO resume_positions (locator, position_ms, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(locator) DO UPDATE
                SET position_ms = excluded.position_ms, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(locator)
        .bind(*position_ms as i64)
        .execute(&mut *tx)
        .await?;
    }
    for locator in deletes {
        sqlx::query("DELETE FROM resume_positions WHERE locator = ?")
            .bind(locator)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
