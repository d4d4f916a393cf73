//! Librarian task definitions
//!
//! Tasks are plain data. The librarian daemon matches on [`LibrarianTask`]
//! and hands each variant to its worker.

use crate::abort::AbortKind;
use crate::diff::Diff;
use crate::workers::notifier::NotifierTask;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Apply one filesystem diff to one library
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTask {
    pub library_id: i64,
    #[serde(default)]
    pub diff: Diff,
    /// Re-read metadata for every comic in the library
    #[serde(default)]
    pub force_import_metadata: bool,
}

impl ImportTask {
    pub fn new(library_id: i64, diff: Diff) -> Self {
        Self {
            library_id,
            diff,
            force_import_metadata: false,
        }
    }
}

/// Re-read metadata for a subset of comics in one library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazyImportTask {
    pub library_id: i64,
    pub paths: BTreeSet<String>,
}

impl From<LazyImportTask> for ImportTask {
    fn from(task: LazyImportTask) -> Self {
        let mut diff = Diff::default();
        diff.files.modified = task.paths;
        ImportTask::new(task.library_id, diff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JanitorTask {
    /// Queue the whole nightly maintenance set
    Nightly,
    CleanupForeignKeys,
    RecomputeGroupCounts,
    CleanupFailedImports,
    CleanupCovers,
    Vacuum,
    Backup,
    IntegrityCheck { long: bool },
    ForeignKeyCheck,
    ClearStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchIndexTask {
    Update { rebuild: bool },
    Optimize,
    Clear,
    RemoveStale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverTask {
    /// Delete cached thumbnails. `custom` selects custom cover ids.
    Remove { ids: Vec<i64>, custom: bool },
    /// Generate thumbnails that are not cached yet
    Create { ids: Vec<i64>, custom: bool },
    /// Remove then create
    Regenerate { ids: Vec<i64>, custom: bool },
    /// Delete cache files no comic or custom cover owns
    RemoveOrphans,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartTask {
    Shutdown,
    Restart,
}

/// Dispatch order, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    Housekeeping,
    Import,
    Nightly,
    Control,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LibrarianTask {
    Import(ImportTask),
    LazyImport(LazyImportTask),
    AdoptOrphanFolders,
    Janitor(JanitorTask),
    SearchIndex(SearchIndexTask),
    Cover(CoverTask),
    Notify(NotifierTask),
    Restart(RestartTask),
    /// Drop queued tasks of a category (the running one is signalled
    /// through [`crate::abort::AbortSignals`])
    Abort(AbortKind),
}

impl LibrarianTask {
    pub fn priority(&self) -> TaskPriority {
        match self {
            LibrarianTask::Abort(_)
            | LibrarianTask::Janitor(JanitorTask::ClearStatus)
            | LibrarianTask::Restart(_)
            | LibrarianTask::Notify(_) => TaskPriority::Control,
            LibrarianTask::Janitor(JanitorTask::Nightly) => TaskPriority::Nightly,
            LibrarianTask::Import(_) | LibrarianTask::LazyImport(_) => TaskPriority::Import,
            LibrarianTask::AdoptOrphanFolders
            | LibrarianTask::Janitor(_)
            | LibrarianTask::SearchIndex(_)
            | LibrarianTask::Cover(_) => TaskPriority::Housekeeping,
        }
    }

    /// Category whose abort signal cancels this task
    pub fn abort_kind(&self) -> Option<AbortKind> {
        match self {
            LibrarianTask::Import(_)
            | LibrarianTask::LazyImport(_)
            | LibrarianTask::AdoptOrphanFolders => Some(AbortKind::Import),
            LibrarianTask::SearchIndex(SearchIndexTask::Update { .. }) => {
                Some(AbortKind::SearchIndex)
            }
            LibrarianTask::Janitor(
                JanitorTask::CleanupForeignKeys
                | JanitorTask::CleanupFailedImports
                | JanitorTask::CleanupCovers
                | JanitorTask::RecomputeGroupCounts,
            ) => Some(AbortKind::Cleanup),
            _ => None,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            LibrarianTask::Import(_) => "import",
            LibrarianTask::LazyImport(_) => "lazy_import",
            LibrarianTask::AdoptOrphanFolders => "adopt_orphan_folders",
            LibrarianTask::Janitor(_) => "janitor",
            LibrarianTask::SearchIndex(_) => "search_index",
            LibrarianTask::Cover(_) => "cover",
            LibrarianTask::Notify(_) => "notify",
            LibrarianTask::Restart(_) => "restart",
            LibrarianTask::Abort(_) => "abort",
        }
    }
}
