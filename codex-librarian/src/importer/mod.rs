//! Library importer
//!
//! [`Importer::apply`] reconciles one filesystem [`Diff`](crate::diff::Diff)
//! with the database. Phases run strictly in this order, each one reading
//! what earlier phases left in the [`ImportContext`]:
//!
//! 1. settle: wait for files to stop growing
//! 2. moved: move directories, comics and custom covers in place
//! 3. aggregate: read metadata for modified and created comics
//! 4. query: find which foreign-key rows are missing
//! 5. create: create them, groups and folders first, credits last
//! 6. comics: update existing comic rows, create the rest
//! 7. link: diff and patch many-to-many links
//! 8. failed: reconcile failed imports
//! 9. covers: import custom cover images
//! 10. delete: remove vanished directories, comics and covers
//! 11. counts: raise series and volume counts to their children
//!
//! Every phase takes the write lock for its own writes only, and every bulk
//! write that fails is logged and skipped so later phases still run.

mod adopt;
mod aggregate;
mod comics;
mod context;
mod counts;
mod covers;
mod create;
mod delete;
mod failed;
mod link;
mod moved;
mod query;
mod settle;

pub use aggregate::aggregate_metadata;
pub use context::{ImportContext, ImportSummary, ResolvedFks};
pub use covers::classify_cover;
pub use settle::wait_for_settle;

use crate::abort::AbortKind;
use crate::db::{self, retry_on_lock};
use crate::error::Aborted;
use crate::extractor::MetadataExtractor;
use crate::status::StatusType;
use crate::tasks::{CoverTask, ImportTask, LazyImportTask, LibrarianTask, SearchIndexTask};
use crate::workers::notifier::NotifierTask;
use crate::LibrarianState;
use anyhow::Result;
use chrono::Utc;
use codex_common::events::{notices, Audience, CodexEvent};
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Delayed-task key for the post-import search index update
pub const SEARCH_UPDATE_KEY: &str = "search_index_update";

/// Paths logged with a failed bulk write
const LOGGED_PATHS: usize = 20;

#[derive(Clone)]
pub struct Importer {
    state: LibrarianState,
    extractor: Arc<dyn MetadataExtractor>,
}

impl Importer {
    pub fn new(state: LibrarianState, extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self { state, extractor }
    }

    fn db(&self) -> &SqlitePool {
        &self.state.db
    }

    /// Apply one diff to one library.
    ///
    /// An abort stops at the next batch boundary and returns the partial
    /// summary with `aborted` set; whatever was written stays written. A phase
    /// error still sends the notices and cover tasks earlier phases queued,
    /// then comes back as the error. Neither stamps `last_poll`.
    pub async fn apply(&self, task: ImportTask) -> Result<ImportSummary> {
        let started = Instant::now();
        let library = db::libraries::load_library(self.db(), task.library_id).await?;
        let abort = self.state.abort.begin(AbortKind::Import);

        let mut diff = task.diff;
        diff.normalize();
        let mut ctx = ImportContext::new(library, diff, task.force_import_metadata, abort);

        info!(
            library_id = ctx.library_id(),
            run_id = %ctx.run_id(),
            changes = ctx.diff.len(),
            force = ctx.force_import_metadata,
            "Import started"
        );

        self.state.status.start_many(&StatusType::IMPORT).await;
        if let Err(e) = db::libraries::set_update_in_progress(self.db(), ctx.library_id(), true).await {
            warn!(library_id = ctx.library_id(), error = %e, "Could not flag library update");
        }

        let result = self.run_phases(&mut ctx).await;

        self.state.status.finish_many(&StatusType::IMPORT).await;
        if let Err(e) = db::libraries::set_update_in_progress(self.db(), ctx.library_id(), false).await {
            warn!(library_id = ctx.library_id(), error = %e, "Could not clear library update flag");
        }

        match result {
            Ok(()) => {}
            Err(e) if e.is::<Aborted>() => {
                ctx.summary.aborted = true;
                info!(library_id = ctx.library_id(), run_id = %ctx.run_id(), "Import aborted");
            }
            Err(e) => {
                // Earlier phases committed; their notices and cover work still go out
                error!(library_id = ctx.library_id(), run_id = %ctx.run_id(), error = %e, "Import failed");
                ctx.summary.aborted = true;
                self.finish(&mut ctx).await;
                return Err(e);
            }
        }

        self.finish(&mut ctx).await;

        let summary = &ctx.summary;
        info!(
            library_id = summary.library_id,
            run_id = %summary.run_id,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            deleted = summary.deleted,
            failed = summary.failed,
            moved = summary.moved,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Import finished"
        );
        Ok(ctx.summary)
    }

    /// Re-read metadata for just the named paths.
    ///
    /// Each path is read whatever its stat says; comics outside the set are
    /// left alone, unlike `force_import_metadata` which covers the library.
    pub async fn apply_lazy(&self, task: LazyImportTask) -> Result<ImportSummary> {
        info!(library_id = task.library_id, paths = task.paths.len(), "Lazy import");
        self.apply(ImportTask::from(task)).await
    }

    async fn run_phases(&self, ctx: &mut ImportContext) -> Result<()> {
        self.settle(ctx).await?;
        self.move_paths(ctx).await?;
        self.update_modified_dirs(ctx).await?;
        self.read_metadata(ctx).await?;
        self.query_missing_fks(ctx).await?;
        self.create_missing_fks(ctx).await?;
        self.update_comics(ctx).await?;
        self.create_comics(ctx).await?;
        self.link_metadata(ctx).await?;
        self.record_failed_imports(ctx).await?;
        self.import_custom_covers(ctx).await?;
        self.delete_paths(ctx).await?;
        self.propagate_group_counts(ctx).await?;
        Ok(())
    }

    /// Notify clients and queue follow-up work
    async fn finish(&self, ctx: &mut ImportContext) {
        let summary = &ctx.summary;
        let notifier = &self.state.notifier;
        let queue = &self.state.queue;

        if summary.library_changed() {
            notifier.notice(NotifierTask::new(notices::LIBRARY_CHANGED, Audience::All));
        }
        if ctx.failed_imports_changed {
            notifier.notice(NotifierTask::new(notices::FAILED_IMPORTS, Audience::Admins));
        }

        let cover_tasks = [
            (&ctx.cover_purge_ids, false, true),
            (&ctx.custom_cover_purge_ids, true, true),
            (&ctx.cover_regenerate_ids, false, false),
            (&ctx.custom_cover_regenerate_ids, true, false),
        ];
        for (ids, custom, purge) in cover_tasks {
            if ids.is_empty() {
                continue;
            }
            let ids: Vec<i64> = ids.iter().copied().collect();
            let task = if purge {
                CoverTask::Remove { ids, custom }
            } else {
                CoverTask::Regenerate { ids, custom }
            };
            queue.push(LibrarianTask::Cover(task));
        }

        let comics_changed =
            summary.created + summary.updated + summary.deleted + summary.moved + summary.links_changed > 0
                || !ctx.cover_purge_ids.is_empty();
        if comics_changed {
            self.state.delayed.schedule(
                SEARCH_UPDATE_KEY,
                self.state.config.search_index_delay,
                LibrarianTask::SearchIndex(SearchIndexTask::Update { rebuild: false }),
            );
        }

        self.state.event_bus.emit_lossy(CodexEvent::ImportFinished {
            run_id: summary.run_id,
            library_id: summary.library_id,
            created: summary.created,
            updated: summary.updated,
            deleted: summary.deleted,
            failed: summary.failed,
            aborted: summary.aborted,
            timestamp: Utc::now(),
        });

        if !summary.aborted {
            if let Err(e) = db::libraries::stamp_last_poll(self.db(), summary.library_id).await {
                warn!(library_id = summary.library_id, error = %e, "Could not stamp last poll");
            }
        }
    }

    /// Run one bulk write with lock retry.
    ///
    /// A failure is logged with the paths involved and comes back as `None`;
    /// the calling phase carries on with what it has.
    async fn bulk_write<T, F, Fut>(&self, operation: &str, paths: &[String], op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = codex_common::Result<T>>,
    {
        match retry_on_lock(operation, self.state.config.max_lock_wait_ms, op).await {
            Ok(value) => Some(value),
            Err(e) => {
                let shown = &paths[..paths.len().min(LOGGED_PATHS)];
                error!(
                    operation,
                    error = %e,
                    path_count = paths.len(),
                    paths = ?shown,
                    "Bulk write failed, skipping batch"
                );
                None
            }
        }
    }
}
