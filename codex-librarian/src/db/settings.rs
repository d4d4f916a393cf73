//! Settings table accessors

use codex_common::{Error, Result};
use sqlx::SqlitePool;

/// Last completed nightly janitor run (RFC 3339)
pub const JANITOR_LAST_NIGHTLY: &str = "janitor_last_nightly";
/// Last completed search index update (RFC 3339)
pub const SEARCH_INDEX_LAST_UPDATE: &str = "search_index_last_update";
/// Number of database backups kept
pub const BACKUP_RETENTION_COUNT: &str = "backup_retention_count";

pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(value) if !value.is_empty() => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Setting {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

pub async fn set_setting<T>(db: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Backups to keep, at least one
pub async fn get_backup_retention(db: &SqlitePool) -> Result<usize> {
    Ok(get_setting::<usize>(db, BACKUP_RETENTION_COUNT)
        .await?
        .unwrap_or(3)
        .max(1))
}
