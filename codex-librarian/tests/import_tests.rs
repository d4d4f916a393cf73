//! Importer scenario tests
//!
//! Each test builds a library on disk, applies diffs through
//! `Importer::apply` and checks the resulting rows.

mod helpers;

use codex_librarian::abort::{AbortKind, AbortSignals};
use codex_librarian::diff::Diff;
use codex_librarian::error::ExtractionError;
use codex_librarian::extractor::{ExtractedCredit, ExtractedMetadata, MetadataExtractor};
use codex_librarian::status::load_statuses;
use codex_librarian::tasks::{CoverTask, LazyImportTask, LibrarianTask};
use codex_common::events::notices;
use helpers::{deleted, issue, modified, TestLibrary};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_new_comics_are_created_with_groups_and_folders() {
    let mut lib = TestLibrary::new().await;
    let mut first = issue("Saga", "v1", "1");
    first.characters = vec!["Alana".into(), "Marko".into()];
    first.credits = vec![ExtractedCredit {
        person: "Brian K. Vaughan".into(),
        role: Some("Writer".into()),
    }];
    let paths = vec![
        lib.write_comic("Saga/Saga 001.cbz", &first),
        lib.write_comic("Saga/Saga 002.cbz", &issue("Saga", "v1", "2")),
    ];

    let summary = lib.import_created(&paths).await;

    assert_eq!(summary.created, 2);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.failed, 0);
    assert!(!summary.aborted);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM comic").await, 2);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM publisher WHERE name = 'Image'").await, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM series WHERE name = 'Saga'").await, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM volume WHERE name = 'v1'").await, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM folder").await, 1);

    let id = lib.comic_id(&paths[0]).await.unwrap();
    let characters = lib.linked_names(id, "comic_characters", "character").await;
    assert_eq!(characters, ["Alana".to_string(), "Marko".to_string()].into());
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM comic_credits").await, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM comic_folders").await, 2);

    // Parent folder is set and the library flag is cleared
    let orphans = lib
        .scalar("SELECT COUNT(*) FROM comic WHERE parent_folder_id IS NULL")
        .await;
    assert_eq!(orphans, 0);
    let flagged = lib
        .scalar("SELECT COUNT(*) FROM library WHERE update_in_progress = 1 OR last_poll IS NULL")
        .await;
    assert_eq!(flagged, 0);

    assert!(lib.drain_notices().contains(&notices::LIBRARY_CHANGED.to_string()));
    assert!(load_statuses(&lib.state.db).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reapplying_same_files_writes_nothing() {
    let lib = TestLibrary::new().await;
    let mut metadata = issue("Paper Girls", "v1", "1");
    metadata.genres = vec!["Science Fiction".into()];
    let paths = vec![lib.write_comic("Paper Girls 001.cbz", &metadata)];
    lib.import_created(&paths).await;
    let before: String = sqlx::query_scalar("SELECT CAST(updated_at AS TEXT) FROM comic")
        .fetch_one(&lib.state.db)
        .await
        .unwrap();

    let summary = lib.import_modified(&paths).await;

    assert_eq!(summary.created, 0);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.links_changed, 0);
    let after: String = sqlx::query_scalar("SELECT CAST(updated_at AS TEXT) FROM comic")
        .fetch_one(&lib.state.db)
        .await
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_changed_tags_converge_to_new_set() {
    let lib = TestLibrary::new().await;
    let mut metadata = issue("Monstress", "v1", "1");
    metadata.tags = vec!["war".into(), "magic".into()];
    let path = lib.write_comic("Monstress 001.cbz", &metadata);
    lib.import_created(&[path.clone()]).await;
    let id = lib.comic_id(&path).await.unwrap();

    metadata.tags = vec!["magic".into(), "cats".into()];
    lib.write_comic("Monstress 001.cbz", &metadata);
    let summary = lib.import_modified(&[path.clone()]).await;

    assert_eq!(summary.created, 0);
    assert!(summary.links_changed >= 2);
    let tags = lib.linked_names(id, "comic_tags", "tag").await;
    assert_eq!(tags, ["cats".to_string(), "magic".to_string()].into());
    assert_eq!(lib.comic_id(&path).await, Some(id));
}

#[tokio::test]
async fn test_failed_import_is_recorded_then_cleared_when_fixed() {
    let mut lib = TestLibrary::new().await;
    let path = lib.write_broken("Broken/Broken 001.cbz");

    let summary = lib.import_created(&[path.clone()]).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.created, 0);
    let reason: String = sqlx::query_scalar("SELECT reason FROM failed_import WHERE path = ?")
        .bind(&path)
        .fetch_one(&lib.state.db)
        .await
        .unwrap();
    assert!(reason.starts_with("Invalid metadata"));
    assert!(lib.drain_notices().contains(&notices::FAILED_IMPORTS.to_string()));

    lib.write_comic("Broken/Broken 001.cbz", &issue("Broken", "v1", "1"));
    let summary = lib.import_modified(&[path.clone()]).await;

    assert_eq!(summary.failed, 0);
    assert_eq!(summary.created, 1);
    assert!(lib.comic_id(&path).await.is_some());
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM failed_import").await, 0);
}

#[tokio::test]
async fn test_comic_that_breaks_leaves_only_a_failed_import() {
    let lib = TestLibrary::new().await;
    let path = lib.write_comic("East of West 001.cbz", &issue("East of West", "v1", "1"));
    lib.import_created(&[path.clone()]).await;
    let id = lib.comic_id(&path).await.unwrap();
    lib.drain_queue();

    lib.write_broken("East of West 001.cbz");
    let summary = lib.import_modified(&[path.clone()]).await;

    assert_eq!(summary.failed, 1);
    assert!(lib.comic_id(&path).await.is_none());
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM failed_import").await, 1);
    let purge = LibrarianTask::Cover(CoverTask::Remove {
        ids: vec![id],
        custom: false,
    });
    assert!(lib.drain_queue().contains(&purge));
}

#[tokio::test]
async fn test_deleted_comic_is_removed_and_cover_purge_queued() {
    let lib = TestLibrary::new().await;
    let keep = lib.write_comic("Descender 001.cbz", &issue("Descender", "v1", "1"));
    let gone = lib.write_comic("Descender 002.cbz", &issue("Descender", "v1", "2"));
    lib.import_created(&[keep.clone(), gone.clone()]).await;
    let gone_id = lib.comic_id(&gone).await.unwrap();
    lib.drain_queue();

    std::fs::remove_file(&gone).unwrap();
    let summary = lib.apply(deleted(&[gone.clone()])).await;

    assert_eq!(summary.deleted, 1);
    assert!(lib.comic_id(&gone).await.is_none());
    assert!(lib.comic_id(&keep).await.is_some());
    let purge = LibrarianTask::Cover(CoverTask::Remove {
        ids: vec![gone_id],
        custom: false,
    });
    assert_eq!(lib.drain_queue(), vec![purge]);
}

#[tokio::test]
async fn test_deleted_directory_removes_its_tree() {
    let lib = TestLibrary::new().await;
    let paths = vec![
        lib.write_comic("Old/Arc/One.cbz", &issue("Old", "v1", "1")),
        lib.write_comic("Old/Two.cbz", &issue("Old", "v1", "2")),
        lib.write_comic("Kept/Three.cbz", &issue("Kept", "v1", "3")),
    ];
    lib.import_created(&paths).await;

    std::fs::remove_dir_all(lib.library_dir.join("Old")).unwrap();
    let mut diff = Diff::default();
    diff.dirs.deleted = [lib.path("Old"), lib.path("Old/Arc")].into();
    let summary = lib.apply(diff).await;

    assert_eq!(summary.deleted, 2);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM comic").await, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM folder").await, 1);
}

#[tokio::test]
async fn test_moved_comic_keeps_its_id_and_relinks_folders() {
    let lib = TestLibrary::new().await;
    let src = lib.write_comic("Inbox/Invincible 001.cbz", &issue("Invincible", "v1", "1"));
    lib.import_created(&[src.clone()]).await;
    let id = lib.comic_id(&src).await.unwrap();

    let dest = lib.path("Invincible/v1/Invincible 001.cbz");
    std::fs::create_dir_all(lib.library_dir.join("Invincible/v1")).unwrap();
    std::fs::rename(&src, &dest).unwrap();
    let mut diff = Diff::default();
    diff.files.moved = [(src.clone(), dest.clone())].into();
    let summary = lib.apply(diff).await;

    assert_eq!(summary.moved, 1);
    assert_eq!(summary.created, 0);
    assert_eq!(lib.comic_id(&dest).await, Some(id));
    assert!(lib.comic_id(&src).await.is_none());

    let folders = lib.linked_names(id, "comic_folders", "folder").await;
    assert_eq!(folders, ["Invincible".to_string(), "v1".to_string()].into());
}

#[tokio::test]
async fn test_move_from_unknown_source_creates() {
    let lib = TestLibrary::new().await;
    let dest = lib.write_comic("Nowhere 001.cbz", &issue("Nowhere", "v1", "1"));
    let mut diff = Diff::default();
    diff.files.moved = [(lib.path("Never Imported.cbz"), dest.clone())].into();

    let summary = lib.apply(diff).await;

    assert_eq!(summary.created, 1);
    assert!(lib.comic_id(&dest).await.is_some());
}

#[tokio::test]
async fn test_deep_folders_are_created_parent_first() {
    let lib = TestLibrary::new().await;
    let path = lib.write_comic("a/b/c/d/Deep 001.cbz", &issue("Deep", "v1", "1"));

    let summary = lib.import_created(&[path.clone()]).await;

    assert_eq!(summary.created, 1);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM folder").await, 4);
    let top_level = lib
        .scalar("SELECT COUNT(*) FROM folder WHERE parent_folder_id IS NULL")
        .await;
    assert_eq!(top_level, 1);
    let parent: String = sqlx::query_scalar(
        "SELECT f.path FROM comic c JOIN folder f ON f.id = c.parent_folder_id WHERE c.path = ?",
    )
    .bind(&path)
    .fetch_one(&lib.state.db)
    .await
    .unwrap();
    assert_eq!(parent, lib.path("a/b/c/d"));
}

#[tokio::test]
async fn test_group_counts_only_rise_during_import() {
    let lib = TestLibrary::new().await;
    let mut metadata = issue("Sandman", "v1", "1");
    metadata.volume_issue_count = Some(5);
    let first = lib.write_comic("Sandman 001.cbz", &metadata);
    lib.import_created(&[first]).await;
    assert_eq!(lib.scalar("SELECT issue_count FROM volume").await, 5);

    // A lower declared count does not lower the stored one
    let mut lower = issue("Sandman", "v1", "2");
    lower.volume_issue_count = Some(2);
    let second = lib.write_comic("Sandman 002.cbz", &lower);
    lib.import_created(&[second]).await;
    assert_eq!(lib.scalar("SELECT issue_count FROM volume").await, 5);

    // Child count above the declared count raises it
    let more: Vec<String> = (3..=7)
        .map(|n| {
            let number = n.to_string();
            lib.write_comic(&format!("Sandman 00{n}.cbz"), &issue("Sandman", "v1", &number))
        })
        .collect();
    lib.import_created(&more).await;
    assert_eq!(lib.scalar("SELECT issue_count FROM volume").await, 7);
}

#[tokio::test]
async fn test_forced_import_rereads_every_comic() {
    let lib = TestLibrary::new().await;
    let paths = vec![
        lib.write_comic("Saga 001.cbz", &issue("Saga", "v1", "1")),
        lib.write_comic("Saga 002.cbz", &issue("Saga", "v1", "2")),
    ];
    lib.import_created(&paths).await;

    let mut task = lib.task(Diff::default());
    task.force_import_metadata = true;
    let summary = lib.importer().apply(task).await.unwrap();

    assert_eq!(summary.unchanged, 2);
    assert_eq!(summary.updated, 0);
}

#[tokio::test]
async fn test_covers_only_library_ignores_comics() {
    let lib = TestLibrary::with_covers_only(true).await;
    let path = lib.write_comic("Saga 001.cbz", &issue("Saga", "v1", "1"));

    let summary = lib.import_created(&[path]).await;

    assert_eq!(summary.created, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM comic").await, 0);
}

/// Fires the import abort while the first batch is being read
struct AbortingExtractor {
    signals: AbortSignals,
}

impl MetadataExtractor for AbortingExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata, ExtractionError> {
        self.signals.abort(AbortKind::Import);
        helpers::json_extractor(path)
    }
}

#[tokio::test]
async fn test_abort_stops_before_writing_comics() {
    let lib = TestLibrary::new().await;
    let path = lib.write_comic("Saga 001.cbz", &issue("Saga", "v1", "1"));
    let importer = lib.importer_with(Arc::new(AbortingExtractor {
        signals: lib.state.abort.clone(),
    }));

    let summary = importer.apply(lib.task(helpers::created(&[path]))).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.created, 0);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM comic").await, 0);
    let flags = lib
        .scalar("SELECT COUNT(*) FROM library WHERE update_in_progress = 0 AND last_poll IS NULL")
        .await;
    assert_eq!(flags, 1);

    // The next import is not affected by the old abort
    let summary = lib.import_created(&[lib.path("Saga 001.cbz")]).await;
    assert!(!summary.aborted);
    assert_eq!(summary.created, 1);
}

#[tokio::test]
async fn test_orphan_folders_are_adopted() {
    let lib = TestLibrary::new().await;
    let path = lib.write_comic("Top/Middle/Leaf.cbz", &issue("Leaf", "v1", "1"));
    lib.import_created(&[path.clone()]).await;

    // Drop the middle folder row, leaving the comic without a parent
    sqlx::query("UPDATE comic SET parent_folder_id = NULL")
        .execute(&lib.state.db)
        .await
        .unwrap();
    sqlx::query("DELETE FROM folder WHERE path = ?")
        .bind(lib.path("Top/Middle"))
        .execute(&lib.state.db)
        .await
        .unwrap();

    let adopted = lib.importer().adopt_orphan_folders().await.unwrap();

    assert_eq!(adopted, 1);
    let parent: String = sqlx::query_scalar(
        "SELECT f.path FROM comic c JOIN folder f ON f.id = c.parent_folder_id WHERE c.path = ?",
    )
    .bind(&path)
    .fetch_one(&lib.state.db)
    .await
    .unwrap();
    assert_eq!(parent, lib.path("Top/Middle"));
}

/// Records every path it is asked to read
#[derive(Default)]
struct RecordingExtractor {
    reads: Mutex<Vec<String>>,
}

impl MetadataExtractor for RecordingExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata, ExtractionError> {
        self.reads
            .lock()
            .unwrap()
            .push(path.to_string_lossy().into_owned());
        helpers::json_extractor(path)
    }
}

#[tokio::test]
async fn test_lazy_import_reads_only_named_paths() {
    let lib = TestLibrary::new().await;
    let paths = vec![
        lib.write_comic("Saga 001.cbz", &issue("Saga", "v1", "1")),
        lib.write_comic("Saga 002.cbz", &issue("Saga", "v1", "2")),
        lib.write_comic("Saga 003.cbz", &issue("Saga", "v1", "3")),
    ];
    lib.import_created(&paths).await;

    let extractor = Arc::new(RecordingExtractor::default());
    let importer = lib.importer_with(extractor.clone());
    let summary = importer
        .apply_lazy(LazyImportTask {
            library_id: lib.library_id,
            paths: [paths[1].clone()].into(),
        })
        .await
        .unwrap();

    assert_eq!(*extractor.reads.lock().unwrap(), vec![paths[1].clone()]);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.created, 0);
}

#[tokio::test]
async fn test_files_created_status_reaches_total_before_reset() {
    let lib = TestLibrary::new().await;
    sqlx::query("CREATE TABLE status_log (status_type TEXT, complete INTEGER, total INTEGER)")
        .execute(&lib.state.db)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TRIGGER status_log_write AFTER UPDATE ON librarian_status BEGIN \
         INSERT INTO status_log VALUES (NEW.status_type, NEW.complete, NEW.total); END",
    )
    .execute(&lib.state.db)
    .await
    .unwrap();

    let path = lib.write_comic("Pub/Series v1/issue 1.cbz", &issue("Series", "v1", "1"));
    lib.import_created(&[path]).await;

    let logged: Vec<(Option<i64>, Option<i64>)> =
        sqlx::query_as("SELECT complete, total FROM status_log WHERE status_type = 'IFC' ORDER BY rowid")
            .fetch_all(&lib.state.db)
            .await
            .unwrap();
    let done = logged
        .iter()
        .position(|row| *row == (Some(1), Some(1)))
        .expect("FilesCreated never reported 1 of 1");
    assert!(logged[done + 1..].contains(&(None, None)));
    assert!(load_statuses(&lib.state.db).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_phase_still_queues_earlier_work() {
    let mut lib = TestLibrary::new().await;
    let path = lib.write_comic("Saga 001.cbz", &issue("Saga", "v1", "1"));
    lib.import_created(&[path.clone()]).await;
    let id = lib.comic_id(&path).await.unwrap();
    lib.drain_queue();
    lib.drain_notices();
    sqlx::query("UPDATE library SET last_poll = NULL")
        .execute(&lib.state.db)
        .await
        .unwrap();

    // Failed import bookkeeping runs after comics are written
    sqlx::query("DROP TABLE failed_import")
        .execute(&lib.state.db)
        .await
        .unwrap();
    let mut changed = issue("Saga", "v1", "1");
    changed.summary = Some("Rewritten".into());
    lib.write_comic("Saga 001.cbz", &changed);

    let result = lib.importer().apply(lib.task(modified(&[path.clone()]))).await;

    assert!(result.is_err());
    let summary: String = sqlx::query_scalar("SELECT summary FROM comic WHERE id = ?")
        .bind(id)
        .fetch_one(&lib.state.db)
        .await
        .unwrap();
    assert_eq!(summary, "Rewritten");
    assert!(lib.drain_notices().contains(&notices::LIBRARY_CHANGED.to_string()));
    assert!(lib.drain_queue().contains(&LibrarianTask::Cover(CoverTask::Regenerate {
        ids: vec![id],
        custom: false,
    })));
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM library WHERE last_poll IS NOT NULL").await, 0);
    assert_eq!(lib.scalar("SELECT COUNT(*) FROM library WHERE update_in_progress = 1").await, 0);
}
