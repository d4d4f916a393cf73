//! Deletion of vanished directories, comics and custom covers

use super::{ImportContext, Importer};
use crate::db;
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::path::Path;
use tracing::info;

impl Importer {
    pub(super) async fn delete_paths(&self, ctx: &mut ImportContext) -> Result<()> {
        self.delete_dirs(ctx).await?;
        self.delete_files(ctx).await?;
        self.delete_covers(ctx).await?;
        Ok(())
    }

    /// Delete folder trees. Comics beneath go with them by cascade, so their
    /// ids are collected for cover purging first.
    async fn delete_dirs(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.diff.dirs.deleted.is_empty() {
            return Ok(());
        }
        // Outermost first; anything nested is already covered
        let mut dirs: Vec<String> = Vec::new();
        for dir in &ctx.diff.dirs.deleted {
            if !dirs.iter().any(|d| Path::new(dir).starts_with(d)) {
                dirs.push(dir.clone());
            }
        }
        let library_id = ctx.library_id();

        let mut status = Status::new(StatusType::DirsDeleted, Some(dirs.len()));
        self.state.status.start(&mut status).await;

        let result = async {
            let _lock = self.state.write_lock.lock().await;
            for dir in &dirs {
                let ids = db::folders::comic_ids_in_tree(self.db(), library_id, dir).await?;
                ctx.summary.deleted += ids.len();
                ctx.cover_purge_ids.extend(ids);
            }
            if let Some(count) = self
                .bulk_write("delete folders", &dirs, || {
                    db::folders::delete_folder_trees(self.db(), library_id, &dirs)
                })
                .await
            {
                ctx.summary.folders_deleted += count as usize;
            }
            status.increment(dirs.len());
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.state.status.finish(&status).await;
        result?;
        info!(library_id, folders = ctx.summary.folders_deleted, "Deleted folders");
        ctx.check_abort()
    }

    async fn delete_files(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.diff.files.deleted.is_empty() {
            return Ok(());
        }
        let paths: Vec<String> = ctx.diff.files.deleted.iter().cloned().collect();
        let library_id = ctx.library_id();

        let mut status = Status::new(StatusType::FilesDeleted, Some(paths.len()));
        self.state.status.start(&mut status).await;

        {
            let _lock = self.state.write_lock.lock().await;
            if let Some(ids) = self
                .bulk_write("delete comics", &paths, || {
                    db::comics::delete_comics(self.db(), library_id, &paths)
                })
                .await
            {
                ctx.summary.deleted += ids.len();
                ctx.cover_purge_ids.extend(ids);
            }
            if let Some(n) = self
                .bulk_write("delete failed imports", &paths, || {
                    db::failed_imports::delete_failed_imports(self.db(), library_id, &paths)
                })
                .await
            {
                ctx.failed_imports_changed |= n > 0;
            }
        }
        status.increment(paths.len());
        self.state.status.finish(&status).await;

        info!(library_id, deleted = ctx.summary.deleted, "Deleted comics");
        ctx.check_abort()
    }

    async fn delete_covers(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.diff.covers.deleted.is_empty() {
            return Ok(());
        }
        let paths: Vec<String> = ctx.diff.covers.deleted.iter().cloned().collect();
        let library_id = ctx.library_id();

        let mut status = Status::new(StatusType::CoversDeleted, Some(paths.len()));
        self.state.status.start(&mut status).await;

        let deleted = {
            let _lock = self.state.write_lock.lock().await;
            self.bulk_write("delete custom covers", &paths, || {
                db::custom_covers::delete_covers(self.db(), library_id, &paths)
            })
            .await
            .unwrap_or_default()
        };
        ctx.summary.covers_changed += deleted.len();
        ctx.custom_cover_purge_ids.extend(deleted);
        status.increment(paths.len());
        self.state.status.finish(&status).await;

        info!(library_id, count = paths.len(), "Deleted custom covers");
        ctx.check_abort()
    }
}
