use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::Subscription;
use crate::forum::url::TargetKind;

// ========== Tracks ==========

/// Create a subscription. `checkpoint` is the seed value (usually the
/// target's current latest identity, so the first poll does not replay
/// history). Returns false if the (chat, url) pair already exists.
pub async fn add_track(
    pool: &SqlitePool,
    chat_id: i64,
    url: &str,
    kind: TargetKind,
    checkpoint: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r"
        INSERT OR IGNORE INTO tracks (chat_id, url, kind, checkpoint)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(chat_id)
    .bind(url)
    .bind(kind.as_str())
    .bind(checkpoint)
    .execute(pool)
    .await
    .context("Failed to insert track")?;

    Ok(result.rows_affected() > 0)
}

/// Remove a subscription. Returns false if it did not exist.
pub async fn remove_track(pool: &SqlitePool, chat_id: i64, url: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tracks WHERE chat_id = ? AND url = ?")
        .bind(chat_id)
        .bind(url)
        .execute(pool)
        .await
        .context("Failed to delete track")?;

    Ok(result.rows_affected() > 0)
}

/// All subscriptions for one chat.
pub async fn list_tracks(pool: &SqlitePool, chat_id: i64) -> Result<Vec<Subscription>> {
    sqlx::query_as("SELECT chat_id, url, kind, checkpoint FROM tracks WHERE chat_id = ?")
        .bind(chat_id)
        .fetch_all(pool)
        .await
        .context("Failed to list tracks for chat")
}

/// Every active subscription, across all chats. One poll cycle reads this
/// once and groups by url.
pub async fn list_all_tracks(pool: &SqlitePool) -> Result<Vec<Subscription>> {
    sqlx::query_as("SELECT chat_id, url, kind, checkpoint FROM tracks")
        .fetch_all(pool)
        .await
        .context("Failed to list all tracks")
}

/// Advance a subscription's checkpoint. The diff engine is the only writer
/// after creation.
pub async fn update_checkpoint(
    pool: &SqlitePool,
    chat_id: i64,
    url: &str,
    checkpoint: &str,
) -> Result<()> {
    sqlx::query("UPDATE tracks SET checkpoint = ? WHERE chat_id = ? AND url = ?")
        .bind(checkpoint)
        .bind(chat_id)
        .bind(url)
        .execute(pool)
        .await
        .context("Failed to update checkpoint")?;

    Ok(())
}

// ========== Moderation ==========

/// Increment a member's warning counter, returning the new count.
pub async fn add_warn(pool: &SqlitePool, chat_id: i64, user_id: i64) -> Result<i64> {
    sqlx::query(
        r"
        INSERT INTO warns (chat_id, user_id, count) VALUES (?, ?, 1)
        ON CONFLICT (chat_id, user_id) DO UPDATE SET count = count + 1
        ",
    )
    .bind(chat_id)
    .bind(user_id)
    .execute(pool)
    .await
    .context("Failed to add warn")?;

    get_warns(pool, chat_id, user_id).await
}

/// A member's current warning count.
pub async fn get_warns(pool: &SqlitePool, chat_id: i64, user_id: i64) -> Result<i64> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT count FROM warns WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get warns")?;

    Ok(row.map_or(0, |(count,)| count))
}

pub async fn clear_warns(pool: &SqlitePool, chat_id: i64, user_id: i64) -> Result<()> {
    sqlx::query("UPDATE warns SET count = 0 WHERE chat_id = ? AND user_id = ?")
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to clear warns")?;

    Ok(())
}

pub async fn add_ban(pool: &SqlitePool, chat_id: i64, user_id: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO bans (chat_id, user_id) VALUES (?, ?)")
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to add ban")?;

    Ok(())
}

pub async fn remove_ban(pool: &SqlitePool, chat_id: i64, user_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM bans WHERE chat_id = ? AND user_id = ?")
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to remove ban")?;

    Ok(result.rows_affected() > 0)
}

pub async fn is_banned(pool: &SqlitePool, chat_id: i64, user_id: i64) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM bans WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to check ban")?;

    Ok(row.is_some())
}
