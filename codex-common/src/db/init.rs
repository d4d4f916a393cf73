//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates every table the
//! librarian writes to. All statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Tag-like tables that are unique by name
pub const NAMED_TABLES: &[&str] = &[
    "character",
    "genre",
    "location",
    "tag",
    "team",
    "series_group",
    "story_arc",
    "credit_person",
    "credit_role",
    "identifier_source",
];

/// Comic junction tables, all shaped `(comic_id, target_id)`, with the
/// table their target points into
pub const JUNCTION_TABLES: &[(&str, &str)] = &[
    ("comic_characters", "character"),
    ("comic_genres", "genre"),
    ("comic_locations", "location"),
    ("comic_tags", "tag"),
    ("comic_teams", "team"),
    ("comic_series_groups", "series_group"),
    ("comic_story_arc_numbers", "story_arc_number"),
    ("comic_credits", "credit"),
    ("comic_identifiers", "identifier"),
    ("comic_folders", "folder"),
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per-connection; they belong on the connect options.
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create every table. Safe to call repeatedly.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_library_table(pool).await?;
    create_custom_cover_table(pool).await?;
    create_folder_table(pool).await?;
    create_group_tables(pool).await?;
    create_named_tables(pool).await?;
    create_compound_tables(pool).await?;
    create_comic_table(pool).await?;
    create_junction_tables(pool).await?;
    create_failed_import_table(pool).await?;
    create_librarian_status_table(pool).await?;
    create_search_tables(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime key-value state (last janitor run and similar).
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_library_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS library (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            covers_only INTEGER NOT NULL DEFAULT 0,
            update_in_progress INTEGER NOT NULL DEFAULT 0,
            last_poll TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_custom_cover_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS custom_cover (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id INTEGER NOT NULL REFERENCES library(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_name TEXT NOT NULL,
            group_code TEXT NOT NULL,
            stat TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(library_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_folder_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS folder (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id INTEGER NOT NULL REFERENCES library(id) ON DELETE CASCADE,
            parent_folder_id INTEGER REFERENCES folder(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_name TEXT NOT NULL,
            stat TEXT,
            custom_cover_id INTEGER REFERENCES custom_cover(id) ON DELETE SET NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(library_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_group_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS publisher (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            sort_name TEXT NOT NULL,
            custom_cover_id INTEGER REFERENCES custom_cover(id) ON DELETE SET NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imprint (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            publisher_id INTEGER NOT NULL REFERENCES publisher(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            sort_name TEXT NOT NULL,
            custom_cover_id INTEGER REFERENCES custom_cover(id) ON DELETE SET NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(publisher_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS series (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            publisher_id INTEGER NOT NULL REFERENCES publisher(id) ON DELETE CASCADE,
            imprint_id INTEGER NOT NULL REFERENCES imprint(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            sort_name TEXT NOT NULL,
            volume_count INTEGER,
            custom_cover_id INTEGER REFERENCES custom_cover(id) ON DELETE SET NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(imprint_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS volume (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            publisher_id INTEGER NOT NULL REFERENCES publisher(id) ON DELETE CASCADE,
            imprint_id INTEGER NOT NULL REFERENCES imprint(id) ON DELETE CASCADE,
            series_id INTEGER NOT NULL REFERENCES series(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            issue_count INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(series_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_named_tables(pool: &SqlitePool) -> Result<()> {
    for table in NAMED_TABLES {
        let extra = if *table == "story_arc" {
            "custom_cover_id INTEGER REFERENCES custom_cover(id) ON DELETE SET NULL,"
        } else {
            ""
        };
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                {extra}
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}

/// Compound dimension tables. Nullable key parts are folded with IFNULL in
/// the unique index so that a NULL role/number/source still collides.
async fn create_compound_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person_id INTEGER NOT NULL REFERENCES credit_person(id) ON DELETE CASCADE,
            role_id INTEGER REFERENCES credit_role(id) ON DELETE CASCADE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS credit_unique ON credit(person_id, IFNULL(role_id, 0))",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS story_arc_number (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            story_arc_id INTEGER NOT NULL REFERENCES story_arc(id) ON DELETE CASCADE,
            number INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS story_arc_number_unique \
         ON story_arc_number(story_arc_id, IFNULL(number, -1))",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identifier (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER REFERENCES identifier_source(id) ON DELETE CASCADE,
            id_type TEXT NOT NULL,
            key TEXT NOT NULL,
            url TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS identifier_unique \
         ON identifier(IFNULL(source_id, 0), id_type, key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_comic_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comic (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id INTEGER NOT NULL REFERENCES library(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            stat TEXT,
            size INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL DEFAULT '',
            sort_name TEXT NOT NULL DEFAULT '',
            issue_number REAL,
            issue_suffix TEXT NOT NULL DEFAULT '',
            year INTEGER,
            month INTEGER,
            day INTEGER,
            summary TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            page_count INTEGER NOT NULL DEFAULT 0,
            language TEXT,
            age_rating TEXT,
            critical_rating REAL,
            file_type TEXT NOT NULL DEFAULT '',
            publisher_id INTEGER NOT NULL REFERENCES publisher(id),
            imprint_id INTEGER NOT NULL REFERENCES imprint(id),
            series_id INTEGER NOT NULL REFERENCES series(id),
            volume_id INTEGER NOT NULL REFERENCES volume(id),
            parent_folder_id INTEGER REFERENCES folder(id) ON DELETE CASCADE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(library_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS comic_volume_idx ON comic(volume_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS comic_parent_folder_idx ON comic(parent_folder_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_junction_tables(pool: &SqlitePool) -> Result<()> {
    for (table, target) in JUNCTION_TABLES {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                comic_id INTEGER NOT NULL REFERENCES comic(id) ON DELETE CASCADE,
                target_id INTEGER NOT NULL REFERENCES {target}(id) ON DELETE CASCADE,
                PRIMARY KEY (comic_id, target_id)
            )
            "#
        );
        sqlx::query(&sql).execute(pool).await?;
        let index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_target_idx ON {table}(target_id)"
        );
        sqlx::query(&index).execute(pool).await?;
    }

    Ok(())
}

async fn create_failed_import_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS failed_import (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            library_id INTEGER NOT NULL REFERENCES library(id) ON DELETE CASCADE,
            parent_folder_id INTEGER REFERENCES folder(id) ON DELETE SET NULL,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            stat TEXT,
            reason TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(library_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_librarian_status_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS librarian_status (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status_type TEXT NOT NULL UNIQUE,
            complete INTEGER,
            total INTEGER,
            subtitle TEXT NOT NULL DEFAULT '',
            preactive TEXT,
            active TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Full-text index over comics. `comic_fts.rowid` is the comic id;
/// `search_index_sync` remembers which `comic.updated_at` was indexed.
async fn create_search_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS comic_fts USING fts5(
            name, publisher, imprint, series, volume, summary, tags
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_index_sync (
            comic_id INTEGER PRIMARY KEY,
            comic_updated_at TEXT NOT NULL,
            indexed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Ensure a setting exists, leaving an existing value untouched
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;

    Ok(())
}

async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "janitor_last_nightly", "").await?;
    ensure_setting(pool, "search_index_last_update", "").await?;
    ensure_setting(pool, "backup_retention_count", "3").await?;
    Ok(())
}
