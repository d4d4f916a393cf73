//! Test Helper Utilities
//!
//! Shared setup for codex-librarian scenario tests: a temp root folder with a
//! fresh database, one registered library, and an extractor that reads the
//! "archive" as JSON metadata.

#![allow(dead_code)]

use codex_common::config::RootFolder;
use codex_common::events::EventBus;
use codex_librarian::config::LibrarianConfig;
use codex_librarian::diff::Diff;
use codex_librarian::error::ExtractionError;
use codex_librarian::extractor::{ExtractedMetadata, MetadataExtractor};
use codex_librarian::importer::{ImportSummary, Importer};
use codex_librarian::tasks::{ImportTask, LibrarianTask};
use codex_librarian::workers::notifier::NotifierMessage;
use codex_librarian::LibrarianState;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Parses the file body as [`ExtractedMetadata`] JSON
pub fn json_extractor(path: &Path) -> Result<ExtractedMetadata, ExtractionError> {
    let body = std::fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|e| ExtractionError::InvalidMetadata(e.to_string()))
}

/// Metadata for one issue of a series
pub fn issue(series: &str, volume: &str, number: &str) -> ExtractedMetadata {
    ExtractedMetadata {
        title: Some(format!("{series} #{number}")),
        issue: Some(number.to_string()),
        publisher: Some("Image".to_string()),
        series: Some(series.to_string()),
        volume: Some(volume.to_string()),
        ..Default::default()
    }
}

pub struct TestLibrary {
    /// Keeps the root folder alive
    pub root: TempDir,
    pub library_dir: PathBuf,
    pub library_id: i64,
    pub state: LibrarianState,
    pub notifier_rx: mpsc::UnboundedReceiver<NotifierMessage>,
}

impl TestLibrary {
    pub async fn new() -> Self {
        Self::with_covers_only(false).await
    }

    pub async fn with_covers_only(covers_only: bool) -> Self {
        let root = TempDir::new().unwrap();
        let root_folder = RootFolder::new(root.path().to_path_buf());
        let db = codex_common::db::init_database(&root_folder.database_path())
            .await
            .unwrap();

        let mut config = LibrarianConfig::with_root(&root_folder);
        config.settle_timeout = Duration::from_secs(2);
        config.settle_poll_initial = Duration::from_millis(1);
        config.status_throttle = Duration::ZERO;
        // Keeps delayed search updates out of the queue during a test
        config.search_index_delay = Duration::from_secs(3600);

        let (state, notifier_rx) = LibrarianState::new(db, EventBus::new(100), config);
        state.status.init_rows().await.unwrap();

        let library_dir = root.path().join("library");
        std::fs::create_dir_all(&library_dir).unwrap();
        let library_id = codex_librarian::db::libraries::create_library(
            &state.db,
            library_dir.to_str().unwrap(),
            covers_only,
        )
        .await
        .unwrap();

        Self {
            root,
            library_dir,
            library_id,
            state,
            notifier_rx,
        }
    }

    pub fn importer(&self) -> Importer {
        self.importer_with(Arc::new(json_extractor))
    }

    pub fn importer_with(&self, extractor: Arc<dyn MetadataExtractor>) -> Importer {
        Importer::new(self.state.clone(), extractor)
    }

    /// Absolute path of `relative` inside the library
    pub fn path(&self, relative: &str) -> String {
        self.library_dir.join(relative).to_string_lossy().into_owned()
    }

    /// Write a comic whose body is its metadata
    pub fn write_comic(&self, relative: &str, metadata: &ExtractedMetadata) -> String {
        let path = self.path(relative);
        if let Some(parent) = Path::new(&path).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, serde_json::to_string(metadata).unwrap()).unwrap();
        path
    }

    /// Write a comic the extractor cannot parse
    pub fn write_broken(&self, relative: &str) -> String {
        let path = self.path(relative);
        if let Some(parent) = Path::new(&path).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"not an archive").unwrap();
        path
    }

    pub fn task(&self, diff: Diff) -> ImportTask {
        ImportTask::new(self.library_id, diff)
    }

    pub async fn apply(&self, diff: Diff) -> ImportSummary {
        self.importer().apply(self.task(diff)).await.unwrap()
    }

    pub async fn import_created(&self, paths: &[String]) -> ImportSummary {
        self.apply(created(paths)).await
    }

    pub async fn import_modified(&self, paths: &[String]) -> ImportSummary {
        self.apply(modified(paths)).await
    }

    /// Single integer from a query
    pub async fn scalar(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&self.state.db).await.unwrap()
    }

    pub async fn comic_id(&self, path: &str) -> Option<i64> {
        sqlx::query_scalar("SELECT id FROM comic WHERE library_id = ? AND path = ?")
            .bind(self.library_id)
            .bind(path)
            .fetch_optional(&self.state.db)
            .await
            .unwrap()
    }

    /// Names linked to a comic through `junction` into `table`
    pub async fn linked_names(&self, comic_id: i64, junction: &str, table: &str) -> BTreeSet<String> {
        let sql = format!(
            "SELECT t.name FROM {junction} j JOIN {table} t ON t.id = j.target_id WHERE j.comic_id = ?"
        );
        let names: Vec<String> = sqlx::query_scalar(&sql)
            .bind(comic_id)
            .fetch_all(&self.state.db)
            .await
            .unwrap();
        names.into_iter().collect()
    }

    /// Empty the task queue, returning what was in it
    pub fn drain_queue(&self) -> Vec<LibrarianTask> {
        let mut tasks = Vec::new();
        while let Some(task) = self.state.queue.try_pop() {
            tasks.push(task);
        }
        tasks
    }

    /// Notices sent so far, status pings dropped
    pub fn drain_notices(&mut self) -> Vec<String> {
        let mut notices = Vec::new();
        while let Ok(message) = self.notifier_rx.try_recv() {
            if let NotifierMessage::Notice(task) = message {
                notices.push(task.text);
            }
        }
        notices
    }
}

pub fn created(paths: &[String]) -> Diff {
    let mut diff = Diff::default();
    diff.files.created = paths.iter().cloned().collect();
    diff
}

pub fn modified(paths: &[String]) -> Diff {
    let mut diff = Diff::default();
    diff.files.modified = paths.iter().cloned().collect();
    diff
}

pub fn deleted(paths: &[String]) -> Diff {
    let mut diff = Diff::default();
    diff.files.deleted = paths.iter().cloned().collect();
    diff
}
