//! Database maintenance
//!
//! Nightly runs queue every maintenance task individually so each one gets
//! its own status row and can be aborted on its own.

use crate::abort::AbortKind;
use crate::db::{self, settings};
use crate::status::{Status, StatusType};
use crate::tasks::{CoverTask, JanitorTask, LibrarianTask, SearchIndexTask};
use crate::LibrarianState;
use anyhow::{bail, Result};
use chrono::Utc;
use codex_common::events::{notices, Audience};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::notifier::NotifierTask;

/// File name prefix of database backups
pub const BACKUP_PREFIX: &str = "codex-backup-";

/// Tasks queued by a nightly run, in order
pub const NIGHTLY_TASKS: [LibrarianTask; 11] = [
    LibrarianTask::AdoptOrphanFolders,
    LibrarianTask::Janitor(JanitorTask::CleanupForeignKeys),
    LibrarianTask::Janitor(JanitorTask::RecomputeGroupCounts),
    LibrarianTask::Janitor(JanitorTask::CleanupFailedImports),
    LibrarianTask::Janitor(JanitorTask::CleanupCovers),
    LibrarianTask::SearchIndex(SearchIndexTask::Update { rebuild: false }),
    LibrarianTask::SearchIndex(SearchIndexTask::Optimize),
    LibrarianTask::Janitor(JanitorTask::ForeignKeyCheck),
    LibrarianTask::Janitor(JanitorTask::IntegrityCheck { long: false }),
    LibrarianTask::Janitor(JanitorTask::Vacuum),
    LibrarianTask::Janitor(JanitorTask::Backup),
];

pub struct Janitor {
    state: LibrarianState,
}

impl Janitor {
    pub fn new(state: LibrarianState) -> Self {
        Self { state }
    }

    fn db(&self) -> &sqlx::SqlitePool {
        &self.state.db
    }

    pub async fn handle(&self, task: JanitorTask) -> Result<()> {
        match task {
            JanitorTask::Nightly => self.queue_nightly().await,
            JanitorTask::CleanupForeignKeys => self.cleanup_foreign_keys().await.map(drop),
            JanitorTask::RecomputeGroupCounts => self.recompute_group_counts().await.map(drop),
            JanitorTask::CleanupFailedImports => self.cleanup_failed_imports().await.map(drop),
            JanitorTask::CleanupCovers => {
                self.state.queue.push(LibrarianTask::Cover(CoverTask::RemoveOrphans));
                Ok(())
            }
            JanitorTask::Vacuum => self.vacuum().await,
            JanitorTask::Backup => self.backup().await.map(drop),
            JanitorTask::IntegrityCheck { long } => self.integrity_check(long).await.map(drop),
            JanitorTask::ForeignKeyCheck => self.foreign_key_check().await.map(drop),
            JanitorTask::ClearStatus => {
                self.state.status.clear_all().await;
                Ok(())
            }
        }
    }

    async fn queue_nightly(&self) -> Result<()> {
        for task in NIGHTLY_TASKS {
            self.state.queue.push(task);
        }
        settings::set_setting(self.db(), settings::JANITOR_LAST_NIGHTLY, Utc::now().to_rfc3339()).await?;
        info!(count = NIGHTLY_TASKS.len(), "Queued nightly maintenance");
        Ok(())
    }

    /// Delete named models and groups no comic references
    pub async fn cleanup_foreign_keys(&self) -> Result<u64> {
        let abort = self.state.abort.begin(AbortKind::Cleanup);
        let mut status = Status::new(StatusType::JanitorCleanupFks, Some(2));
        self.state.status.start(&mut status).await;

        let result = async {
            let _lock = self.state.write_lock.lock().await;
            let named = db::named::delete_orphan_named(self.db()).await?;
            for (table, count) in named.iter().filter(|(_, c)| **c > 0) {
                info!(table = *table, count = *count, "Deleted orphan rows");
            }
            status.increment(1);
            if abort.is_cancelled() {
                return Ok(named.values().sum());
            }
            let groups = db::groups::delete_orphan_groups(self.db()).await?;
            status.increment(1);
            if groups > 0 {
                info!(count = groups, "Deleted orphan groups");
            }
            Ok::<u64, anyhow::Error>(named.values().sum::<u64>() + groups)
        }
        .await;
        self.state.status.finish(&status).await;

        let deleted = result?;
        if deleted > 0 {
            self.state
                .notifier
                .notice(NotifierTask::new(notices::LIBRARY_CHANGED, Audience::All));
        }
        Ok(deleted)
    }

    /// Set series and volume counts to their real child counts
    pub async fn recompute_group_counts(&self) -> Result<u64> {
        let mut status = Status::new(StatusType::JanitorRecount, None);
        self.state.status.start(&mut status).await;
        let result = {
            let _lock = self.state.write_lock.lock().await;
            db::groups::recompute_all_counts(self.db()).await
        };
        self.state.status.finish(&status).await;
        let updated = result?;
        info!(count = updated, "Recomputed group counts");
        Ok(updated)
    }

    /// Drop failed imports whose file is gone or which also have a comic
    pub async fn cleanup_failed_imports(&self) -> Result<u64> {
        let abort = self.state.abort.begin(AbortKind::Cleanup);
        let mut status = Status::new(StatusType::JanitorCleanupFailed, None);
        self.state.status.start(&mut status).await;

        let result = async {
            let rows = db::failed_imports::all_failed_imports(self.db()).await?;
            let mut vanished: BTreeMap<i64, Vec<String>> = BTreeMap::new();
            for (library_id, path) in rows {
                if !Path::new(&path).exists() {
                    vanished.entry(library_id).or_default().push(path);
                }
            }

            let _lock = self.state.write_lock.lock().await;
            let mut deleted = db::failed_imports::delete_failed_with_comics(self.db(), None).await?;
            for (library_id, paths) in &vanished {
                if abort.is_cancelled() {
                    break;
                }
                deleted += db::failed_imports::delete_failed_imports(self.db(), *library_id, paths).await?;
                status.increment(paths.len());
            }
            Ok::<u64, anyhow::Error>(deleted)
        }
        .await;
        self.state.status.finish(&status).await;

        let deleted = result?;
        if deleted > 0 {
            info!(count = deleted, "Cleaned up failed imports");
            self.state
                .notifier
                .notice(NotifierTask::new(notices::FAILED_IMPORTS, Audience::Admins));
        }
        Ok(deleted)
    }

    pub async fn vacuum(&self) -> Result<()> {
        let mut status = Status::new(StatusType::JanitorVacuum, None);
        self.state.status.start(&mut status).await;
        let result = async {
            let _lock = self.state.write_lock.lock().await;
            sqlx::query("VACUUM").execute(self.db()).await?;
            sqlx::query("PRAGMA optimize").execute(self.db()).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        self.state.status.finish(&status).await;
        result?;
        info!("Vacuumed database");
        Ok(())
    }

    /// Snapshot the database with `VACUUM INTO` and prune old snapshots
    pub async fn backup(&self) -> Result<PathBuf> {
        let dir = self.state.config.backup_dir.clone();
        let mut status = Status::new(StatusType::JanitorBackup, None);
        self.state.status.start(&mut status).await;

        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            let name = format!("{}{}.sqlite3", BACKUP_PREFIX, Utc::now().format("%Y%m%d-%H%M%S%.3f"));
            let path = dir.join(name);
            {
                let _lock = self.state.write_lock.lock().await;
                sqlx::query("VACUUM INTO ?")
                    .bind(path.to_string_lossy().into_owned())
                    .execute(self.db())
                    .await?;
            }
            let keep = settings::get_backup_retention(self.db()).await?;
            let pruned = prune_backups(&dir, keep)?;
            Ok::<(PathBuf, usize), anyhow::Error>((path, pruned))
        }
        .await;
        self.state.status.finish(&status).await;

        let (path, pruned) = result?;
        info!(path = %path.display(), pruned, "Backed up database");
        Ok(path)
    }

    /// Run `integrity_check` (long) or `quick_check`. Returns the problems
    /// reported, empty when the database is sound.
    pub async fn integrity_check(&self, long: bool) -> Result<Vec<String>> {
        let pragma = if long { "PRAGMA integrity_check" } else { "PRAGMA quick_check" };
        let mut status = Status::new(StatusType::JanitorIntegrityCheck, None);
        self.state.status.start(&mut status).await;
        let result: Result<Vec<String>, sqlx::Error> = sqlx::query_scalar(pragma).fetch_all(self.db()).await;
        self.state.status.finish(&status).await;

        let problems: Vec<String> = result?.into_iter().filter(|r| r != "ok").collect();
        if problems.is_empty() {
            info!(long, "Database integrity ok");
        } else {
            for problem in &problems {
                error!(problem = %problem, "Database integrity problem");
            }
        }
        Ok(problems)
    }

    /// Delete rows whose foreign keys point nowhere. Returns rows deleted.
    pub async fn foreign_key_check(&self) -> Result<u64> {
        let mut status = Status::new(StatusType::JanitorForeignKeyCheck, None);
        self.state.status.start(&mut status).await;

        let result = async {
            let violations: Vec<(String, Option<i64>, String, i64)> =
                sqlx::query_as("PRAGMA foreign_key_check").fetch_all(self.db()).await?;
            if violations.is_empty() {
                return Ok(0);
            }

            let _lock = self.state.write_lock.lock().await;
            let mut deleted = 0;
            for (table, rowid, parent, _) in &violations {
                let Some(rowid) = rowid else {
                    warn!(table = %table, parent = %parent, "Foreign key violation without rowid");
                    continue;
                };
                if !is_plain_identifier(table) {
                    bail!("Unexpected table name from foreign_key_check: {}", table);
                }
                warn!(table = %table, rowid, parent = %parent, "Deleting row with dangling foreign key");
                deleted += sqlx::query(&format!("DELETE FROM \"{}\" WHERE rowid = ?", table))
                    .bind(*rowid)
                    .execute(self.db())
                    .await?
                    .rows_affected();
            }
            Ok::<u64, anyhow::Error>(deleted)
        }
        .await;
        self.state.status.finish(&status).await;

        let deleted = result?;
        info!(count = deleted, "Foreign key check done");
        Ok(deleted)
    }
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Keep the newest `keep` backups in `dir`. Returns how many were removed.
pub fn prune_backups(dir: &Path, keep: usize) -> std::io::Result<usize> {
    let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(BACKUP_PREFIX))
                .unwrap_or(false)
        })
        .collect();
    // Timestamped names sort oldest first
    backups.sort();

    let excess = backups.len().saturating_sub(keep);
    for path in &backups[..excess] {
        std::fs::remove_file(path)?;
    }
    Ok(excess)
}
