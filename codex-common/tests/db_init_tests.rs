//! Database initialization tests
//!
//! Fresh creation, reopening an existing file, default settings, and the
//! presence of every table the librarian writes to.

use codex_common::db::init::{init_database, JUNCTION_TABLES, NAMED_TABLES};
use codex_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("sub").join("codex.sqlite3");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("codex.sqlite3");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    let version = get_schema_version(&pool2.unwrap()).await.unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("codex.sqlite3")).await.unwrap();

    let retention: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'backup_retention_count'")
            .fetch_optional(&pool)
            .await
            .unwrap();
    assert_eq!(retention.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_all_tables_exist() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("codex.sqlite3")).await.unwrap();

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type IN ('table') ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    let mut expected: Vec<&str> = vec![
        "library",
        "folder",
        "publisher",
        "imprint",
        "series",
        "volume",
        "comic",
        "credit",
        "story_arc_number",
        "identifier",
        "failed_import",
        "custom_cover",
        "librarian_status",
        "settings",
        "comic_fts",
        "search_index_sync",
    ];
    expected.extend(NAMED_TABLES.iter().copied());
    expected.extend(JUNCTION_TABLES.iter().map(|(table, _)| *table));

    for table in expected {
        assert!(tables.iter().any(|t| t == table), "missing table {}", table);
    }
}

#[tokio::test]
async fn test_foreign_keys_enforced_on_every_connection() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("codex.sqlite3")).await.unwrap();

    for _ in 0..3 {
        let mut conn = pool.acquire().await.unwrap();
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
