//! Comic row upserts

use super::{ImportContext, Importer};
use crate::db;
use crate::db::comics::ComicRow;
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};

impl Importer {
    /// Build rows for `paths`. Records whose foreign keys did not resolve
    /// move to the failed set.
    fn resolve_rows<'a>(ctx: &'a ImportContext, paths: &BTreeSet<String>) -> (Vec<ComicRow<'a>>, Vec<String>) {
        let mut rows = Vec::with_capacity(paths.len());
        let mut unresolved = Vec::new();
        for path in paths {
            let Some(record) = ctx.records.get(path) else { continue };
            match ctx.fks.comic_fks(record) {
                Some(fks) => rows.push(ComicRow { record, fks }),
                None => unresolved.push(path.clone()),
            }
        }
        (rows, unresolved)
    }

    fn fail_unresolved(ctx: &mut ImportContext, unresolved: Vec<String>) {
        for path in unresolved {
            debug!(path = %path, "Comic foreign keys unresolved");
            ctx.records.remove(&path);
            ctx.links.remove(&path);
            ctx.failed
                .insert(path, "Could not create the comic's groups or folder".to_string());
        }
        ctx.summary.failed = ctx.failed.len();
    }

    /// Overwrite comics that already have a row
    pub(super) async fn update_comics(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.records.is_empty() {
            return Ok(());
        }
        let library_id = ctx.library_id();
        let paths: Vec<String> = ctx.records.keys().cloned().collect();
        let existing = db::comics::comic_ids(self.db(), library_id, &paths).await?;
        for path in paths {
            if existing.contains_key(&path) {
                ctx.update_paths.insert(path);
            } else {
                ctx.create_paths.insert(path);
            }
        }
        ctx.comic_ids.extend(existing);
        if ctx.update_paths.is_empty() {
            return Ok(());
        }

        let mut status = Status::new(StatusType::FilesModified, Some(ctx.update_paths.len()));
        self.state.status.start(&mut status).await;

        let update_paths = ctx.update_paths.clone();
        let (written, unresolved, attempted) = {
            let (rows, unresolved) = Self::resolve_rows(ctx, &update_paths);
            let attempted = rows.len();
            let _lock = self.state.write_lock.lock().await;
            let sample: Vec<String> = rows.iter().map(|r| r.record.path.clone()).collect();
            let written = self
                .bulk_write("update comics", &sample, || {
                    db::comics::upsert_comics(self.db(), library_id, &rows)
                })
                .await;
            (written, unresolved, attempted)
        };
        Self::fail_unresolved(ctx, unresolved);

        if let Some(written) = written {
            ctx.summary.updated += written.len();
            ctx.summary.unchanged += attempted - written.len();
            for (path, id) in written {
                ctx.cover_regenerate_ids.insert(id);
                ctx.written_comic_ids.insert(id);
                ctx.comic_ids.insert(path, id);
            }
        }
        status.increment(update_paths.len());
        self.state.status.finish(&status).await;

        info!(
            library_id,
            updated = ctx.summary.updated,
            unchanged = ctx.summary.unchanged,
            "Updated comics"
        );
        ctx.check_abort()
    }

    /// Insert comics that had no row
    pub(super) async fn create_comics(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.create_paths.is_empty() {
            return Ok(());
        }
        let library_id = ctx.library_id();
        let mut status = Status::new(StatusType::FilesCreated, Some(ctx.create_paths.len()));
        self.state.status.start(&mut status).await;

        let create_paths = ctx.create_paths.clone();
        let (written, unresolved, attempted) = {
            let (rows, unresolved) = Self::resolve_rows(ctx, &create_paths);
            let attempted: Vec<String> = rows.iter().map(|r| r.record.path.clone()).collect();
            let _lock = self.state.write_lock.lock().await;
            let written = self
                .bulk_write("create comics", &attempted, || {
                    db::comics::upsert_comics(self.db(), library_id, &rows)
                })
                .await;
            (written, unresolved, attempted)
        };
        Self::fail_unresolved(ctx, unresolved);

        if let Some(written) = written {
            ctx.summary.created += written.len();
            for (path, id) in &written {
                ctx.written_comic_ids.insert(*id);
                ctx.comic_ids.insert(path.clone(), *id);
            }

            // A row that appeared since the lookup and already matched
            let missed: Vec<String> = attempted
                .into_iter()
                .filter(|p| !ctx.comic_ids.contains_key(p))
                .collect();
            if !missed.is_empty() {
                let found = db::comics::comic_ids(self.db(), library_id, &missed).await?;
                ctx.summary.unchanged += found.len();
                ctx.comic_ids.extend(found);
            }
        }
        status.increment(create_paths.len());
        self.state.status.finish(&status).await;

        info!(library_id, created = ctx.summary.created, "Created comics");
        ctx.check_abort()
    }
}
