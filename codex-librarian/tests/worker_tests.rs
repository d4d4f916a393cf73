//! Janitor, search indexer, cover cache and daemon tests

mod helpers;

use codex_librarian::abort::AbortKind;
use codex_librarian::db::settings;
use codex_librarian::tasks::{ImportTask, JanitorTask, LibrarianTask, RestartTask};
use codex_librarian::workers::covers::{cover_cache_path, CopyImageGenerator, CoverWorker};
use codex_librarian::workers::janitor::{Janitor, NIGHTLY_TASKS};
use codex_librarian::workers::librarian::{DaemonExit, LibrarianDaemon};
use codex_librarian::workers::notifier::NotifierTask;
use codex_librarian::workers::search::{search_comics, stale_comic_ids, SearchIndexer};
use codex_common::events::{notices, Audience};
use helpers::{deleted, issue, TestLibrary};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cleanup_foreign_keys_removes_unreferenced_rows() {
    let lib = TestLibrary::new().await;
    let mut metadata = issue("Saga", "v1", "1");
    metadata.characters = vec!["Lying Cat".into()];
    let path = lib.write_comic("Saga 001.cbz", &metadata);
    let kept = lib.write_comic("Y 001.cbz", &issue("Y The Last Man", "v1", "1"));
    lib.import_created(&[path.clone(), kept]).await;

    std::fs::remove_file(&path).unwrap();
    lib.apply(deleted(&[path])).await;
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM character").await, 1);

    let removed = Janitor::new(lib.state.clone()).cleanup_foreign_keys().await.unwrap();

    assert!(removed >= 3);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM character").await, 0);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM series WHERE name = 'Saga'").await, 0);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM series").await, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM publisher").await, 1);
}

#[tokio::test]
async fn test_recompute_group_counts_may_lower() {
    let lib = TestLibrary::new().await;
    let mut metadata = issue("Sandman", "v1", "1");
    metadata.volume_issue_count = Some(75);
    let path = lib.write_comic("Sandman 001.cbz", &metadata);
    lib.import_created(&[path]).await;
    assert_eq!(lib.scalar("SELECT issue_count FROM volume").await, 75);

    let updated = Janitor::new(lib.state.clone()).recompute_group_counts().await.unwrap();

    assert!(updated >= 1);
    assert_eq!(lib.scalar("SELECT issue_count FROM volume").await, 1);
    assert_eq!(lib.scalar("SELECT volume_count FROM series").await, 1);
}

#[tokio::test]
async fn test_cleanup_failed_imports_drops_vanished_files() {
    let lib = TestLibrary::new().await;
    let gone = lib.write_broken("Gone.cbz");
    let still_there = lib.write_broken("Still There.cbz");
    lib.import_created(&[gone.clone(), still_there]).await;
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM failed_import").await, 2);

    std::fs::remove_file(&gone).unwrap();
    let removed = Janitor::new(lib.state.clone()).cleanup_failed_imports().await.unwrap();

    assert_eq!(removed, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM failed_import").await, 1);
}

#[tokio::test]
async fn test_backup_keeps_retention_count() {
    let lib = TestLibrary::new().await;
    settings::set_setting(&lib.state.db, settings::BACKUP_RETENTION_COUNT, 1)
        .await
        .unwrap();
    let janitor = Janitor::new(lib.state.clone());

    let first = janitor.backup().await.unwrap();
    assert!(first.exists());
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = janitor.backup().await.unwrap();

    assert!(second.exists());
    assert!(!first.exists());
    let backups = std::fs::read_dir(&lib.state.config.backup_dir).unwrap().count();
    assert_eq!(backups, 1);
}

#[tokio::test]
async fn test_integrity_checks_pass_on_fresh_database() {
    let lib = TestLibrary::new().await;
    let janitor = Janitor::new(lib.state.clone());

    assert!(janitor.integrity_check(false).await.unwrap().is_empty());
    assert!(janitor.integrity_check(true).await.unwrap().is_empty());
    assert_eq!(janitor.foreign_key_check().await.unwrap(), 0);
}

#[tokio::test]
async fn test_foreign_key_check_deletes_dangling_rows() {
    let lib = TestLibrary::new().await;
    {
        let mut conn = lib.state.db.acquire().await.unwrap();
        sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await.unwrap();
        sqlx::query("INSERT INTO comic_tags (comic_id, target_id) VALUES (999, 999)")
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await.unwrap();
    }

    let deleted = Janitor::new(lib.state.clone()).foreign_key_check().await.unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM comic_tags").await, 0);
}

#[tokio::test]
async fn test_nightly_queues_maintenance_and_stamps_setting() {
    let lib = TestLibrary::new().await;

    Janitor::new(lib.state.clone())
        .handle(JanitorTask::Nightly)
        .await
        .unwrap();

    let queued = lib.drain_queue();
    assert_eq!(queued.len(), NIGHTLY_TASKS.len());
    assert!(queued.contains(&LibrarianTask::Janitor(JanitorTask::Backup)));
    let stamp: Option<String> = settings::get_setting(&lib.state.db, settings::JANITOR_LAST_NIGHTLY)
        .await
        .unwrap();
    assert!(stamp.is_some());
}

#[tokio::test]
async fn test_search_index_tracks_comics() {
    let mut lib = TestLibrary::new().await;
    let mut metadata = issue("Saga", "v1", "1");
    metadata.summary = Some("Star-crossed lovers on the run".into());
    metadata.characters = vec!["Hazel".into()];
    let saga = lib.write_comic("Saga 001.cbz", &metadata);
    let other = lib.write_comic("Y 001.cbz", &issue("Y The Last Man", "v1", "1"));
    lib.import_created(&[saga.clone(), other.clone()]).await;
    let saga_id = lib.comic_id(&saga).await.unwrap();
    lib.drain_notices();

    let indexer = SearchIndexer::new(lib.state.clone());
    assert_eq!(indexer.update(false).await.unwrap(), 2);
    assert!(stale_comic_ids(&lib.state.db).await.unwrap().is_empty());
    assert!(lib.drain_notices().contains(&notices::SEARCH_INDEX_UPDATED.to_string()));

    assert_eq!(search_comics(&lib.state.db, "lovers", 10).await.unwrap(), vec![saga_id]);
    assert_eq!(search_comics(&lib.state.db, "Hazel", 10).await.unwrap(), vec![saga_id]);

    // Nothing changed, nothing to index
    assert_eq!(indexer.update(false).await.unwrap(), 0);

    std::fs::remove_file(&other).unwrap();
    lib.apply(deleted(&[other])).await;
    assert_eq!(indexer.remove_stale().await.unwrap(), 1);

    assert_eq!(indexer.update(true).await.unwrap(), 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM comic_fts").await, 1);
}

#[tokio::test]
async fn test_search_update_stops_when_aborted() {
    let lib = TestLibrary::new().await;
    let path = lib.write_comic("Saga 001.cbz", &issue("Saga", "v1", "1"));
    lib.import_created(&[path]).await;

    // A cancelled token is replaced when the next update begins
    lib.state.abort.begin(AbortKind::SearchIndex);
    lib.state.abort.abort(AbortKind::SearchIndex);
    let indexer = SearchIndexer::new(lib.state.clone());
    assert_eq!(indexer.update(false).await.unwrap(), 1);
}

#[tokio::test]
async fn test_cover_cache_orphans_removed() {
    let lib = TestLibrary::new().await;
    let path = lib.write_comic("Saga 001.cbz", &issue("Saga", "v1", "1"));
    lib.import_created(&[path.clone()]).await;
    let id = lib.comic_id(&path).await.unwrap();

    let cache_dir = lib.state.config.cover_cache_dir.clone();
    let owned = cover_cache_path(&cache_dir, id, false);
    let stray = cover_cache_path(&cache_dir, id + 100, false);
    for file in [&owned, &stray] {
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, b"webp").unwrap();
    }

    let worker = CoverWorker::new(lib.state.clone(), Arc::new(CopyImageGenerator));
    assert_eq!(worker.remove_orphans().await.unwrap(), 1);
    assert!(owned.exists());
    assert!(!stray.exists());

    assert_eq!(worker.remove(&[id], false).await, 1);
    assert!(!owned.exists());
}

#[tokio::test]
async fn test_daemon_abort_drops_queued_imports_then_shuts_down() {
    let mut lib = TestLibrary::new().await;
    let queue = &lib.state.queue;
    queue.push(LibrarianTask::Import(ImportTask::new(lib.library_id, Default::default())));
    queue.push(LibrarianTask::LazyImport(codex_librarian::tasks::LazyImportTask {
        library_id: lib.library_id,
        paths: Default::default(),
    }));
    queue.push(LibrarianTask::Abort(AbortKind::Import));
    queue.push(LibrarianTask::Notify(NotifierTask::new("hello", Audience::All)));
    queue.push(LibrarianTask::Restart(RestartTask::Shutdown));

    let daemon = LibrarianDaemon::new(
        lib.state.clone(),
        Arc::new(helpers::json_extractor),
        Arc::new(CopyImageGenerator),
    );
    let exit = tokio::time::timeout(Duration::from_secs(10), daemon.run())
        .await
        .unwrap();

    assert_eq!(exit, DaemonExit::Shutdown);
    assert!(lib.state.queue.is_empty());
    assert!(lib.state.shutdown.is_cancelled());
    assert!(lib.drain_notices().contains(&"hello".to_string()));
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM library WHERE last_poll IS NOT NULL").await, 0);
}

#[tokio::test]
async fn test_daemon_reports_restart() {
    let lib = TestLibrary::new().await;
    lib.state.enqueue(LibrarianTask::Janitor(JanitorTask::ClearStatus));
    lib.state.enqueue(LibrarianTask::Restart(RestartTask::Restart));

    let daemon = LibrarianDaemon::new(
        lib.state.clone(),
        Arc::new(helpers::json_extractor),
        Arc::new(CopyImageGenerator),
    );
    let exit = tokio::time::timeout(Duration::from_secs(10), daemon.run())
        .await
        .unwrap();

    assert_eq!(exit, DaemonExit::Restart);
    assert!(lib.state.queue.pop().await.is_none());
}
