//! Database schema migrations
//!
//! Versioned migrations tracked in the `schema_version` table. `CREATE TABLE
//! IF NOT EXISTS` in [`crate::db::init`] builds fresh databases; migrations
//! bring databases created by older builds up to the same shape.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - add a new one per schema change
//! 2. **Idempotent** - check before altering, migrations may re-run
//! 3. **Prefer ALTER TABLE** over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if the table has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        set_schema_version(pool, 1).await?;
        info!("Migration v1 (baseline) recorded");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v2: `comic.file_type` (cbz, cbr, pdf...) for per-format browsing
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('comic') WHERE name = 'file_type'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        return Ok(());
    }

    sqlx::query("ALTER TABLE comic ADD COLUMN file_type TEXT NOT NULL DEFAULT ''")
        .execute(pool)
        .await?;
    sqlx::query(
        r#"
        UPDATE comic SET file_type = LOWER(
            REPLACE(path, RTRIM(path, REPLACE(path, '.', '')), '')
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Added file_type column to comic table");
    Ok(())
}
