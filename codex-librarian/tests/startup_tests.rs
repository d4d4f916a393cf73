//! Startup wiring: root folder resolution, config and status table

use codex_common::config::{
    load_toml_config, resolve_root_folder, write_toml_config, RootFolder, TomlConfig, ROOT_FOLDER_ENV,
};
use codex_common::events::EventBus;
use codex_librarian::config::LibrarianConfig;
use codex_librarian::status::{load_statuses, Status, StatusType};
use codex_librarian::LibrarianState;
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
#[serial]
async fn test_root_from_env_and_librarian_table_from_toml() {
    let dir = TempDir::new().unwrap();
    let root_path = dir.path().join("root");
    let config_path = dir.path().join("codex.toml");

    let mut librarian = toml::Table::new();
    librarian.insert("nightly_hour".into(), toml::Value::Integer(4));
    librarian.insert("search_index_delay_secs".into(), toml::Value::Float(0.5));
    let written = TomlConfig {
        librarian: Some(librarian),
        ..Default::default()
    };
    write_toml_config(&written, &config_path).unwrap();

    std::env::set_var(ROOT_FOLDER_ENV, &root_path);
    let toml_config = load_toml_config(&config_path).unwrap();
    let root = RootFolder::new(resolve_root_folder(None, ROOT_FOLDER_ENV, Some(&toml_config)));
    std::env::remove_var(ROOT_FOLDER_ENV);

    assert_eq!(root.path(), root_path.as_path());
    let config = LibrarianConfig::from_toml(&root, &toml_config).unwrap();
    assert_eq!(config.nightly_hour, 4);
    assert_eq!(config.search_index_delay, Duration::from_millis(500));
    assert_eq!(config.cover_cache_dir, root_path.join("cache").join("covers"));
}

#[tokio::test]
#[serial]
async fn test_status_rows_reset_on_startup() {
    let dir = TempDir::new().unwrap();
    let root = RootFolder::new(dir.path().to_path_buf());
    root.ensure_directory_exists().unwrap();
    let db = codex_common::db::init_database(&root.database_path()).await.unwrap();
    let (state, _rx) = LibrarianState::new(db.clone(), EventBus::new(16), LibrarianConfig::with_root(&root));
    state.status.init_rows().await.unwrap();

    // A status left running by a crash
    let mut status = Status::new(StatusType::SearchIndexUpdate, Some(10));
    state.status.start(&mut status).await;
    assert_eq!(load_statuses(&db).await.unwrap().len(), 1);

    state.status.init_rows().await.unwrap();
    assert!(load_statuses(&db).await.unwrap().is_empty());
}
