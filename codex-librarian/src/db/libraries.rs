//! Library rows

use crate::models::Library;
use codex_common::{Error, Result};
use sqlx::{Row, SqlitePool};

fn row_to_library(row: &sqlx::sqlite::SqliteRow) -> Result<Library> {
    Ok(Library {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        covers_only: row.try_get("covers_only")?,
        update_in_progress: row.try_get("update_in_progress")?,
    })
}

/// Register a library root, returning its id. Re-registering a path returns
/// the existing id.
pub async fn create_library(db: &SqlitePool, path: &str, covers_only: bool) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO library (path, covers_only) VALUES (?, ?)
        ON CONFLICT(path) DO UPDATE SET covers_only = excluded.covers_only
        RETURNING id
        "#,
    )
    .bind(path.trim_end_matches('/'))
    .bind(covers_only)
    .fetch_one(db)
    .await?;

    Ok(id)
}

pub async fn load_library(db: &SqlitePool, library_id: i64) -> Result<Library> {
    let row = sqlx::query(
        "SELECT id, path, covers_only, update_in_progress FROM library WHERE id = ?",
    )
    .bind(library_id)
    .fetch_optional(db)
    .await?
    .ok_or(Error::LibraryNotFound(library_id))?;

    row_to_library(&row)
}

pub async fn list_libraries(db: &SqlitePool) -> Result<Vec<Library>> {
    let rows = sqlx::query(
        "SELECT id, path, covers_only, update_in_progress FROM library ORDER BY id",
    )
    .fetch_all(db)
    .await?;

    rows.iter().map(row_to_library).collect()
}

pub async fn set_update_in_progress(db: &SqlitePool, library_id: i64, value: bool) -> Result<()> {
    sqlx::query(
        "UPDATE library SET update_in_progress = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(value)
    .bind(library_id)
    .execute(db)
    .await?;

    Ok(())
}

/// Record a completed sync
pub async fn stamp_last_poll(db: &SqlitePool, library_id: i64) -> Result<()> {
    sqlx::query("UPDATE library SET last_poll = ? WHERE id = ?")
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(library_id)
        .execute(db)
        .await?;

    Ok(())
}
