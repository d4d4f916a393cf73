//! Failed import bookkeeping
//!
//! A path is in exactly one of two states after an apply: it has a comic row
//! or it has a failed import row. Never both.

use super::create::path_name;
use super::{ImportContext, Importer};
use crate::db;
use crate::db::failed_imports::NewFailedImport;
use crate::models::FileStat;
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

impl Importer {
    pub(super) async fn record_failed_imports(&self, ctx: &mut ImportContext) -> Result<()> {
        let library_id = ctx.library_id();
        let known = db::failed_imports::failed_paths(self.db(), library_id).await?;
        if ctx.failed.is_empty() && known.is_empty() {
            return Ok(());
        }

        let mut status = Status::new(StatusType::FailedImports, Some(ctx.failed.len() + known.len()));
        self.state.status.start(&mut status).await;

        let result = async {
            let _lock = self.state.write_lock.lock().await;
            let mut changed = 0u64;

            if !ctx.failed.is_empty() {
                let parents: BTreeSet<String> = ctx
                    .failed
                    .keys()
                    .filter_map(|p| ctx.library.parent_folder(p))
                    .collect();
                let (parent_ids, created) = self.ensure_folders(&ctx.library, &parents).await?;
                ctx.summary.folders_created += created;

                let rows: Vec<NewFailedImport> = ctx
                    .failed
                    .iter()
                    .map(|(path, reason)| NewFailedImport {
                        path: path.clone(),
                        name: path_name(path),
                        parent_folder_id: ctx
                            .library
                            .parent_folder(path)
                            .and_then(|p| parent_ids.get(&p).copied()),
                        stat: FileStat::from_path_lossy(Path::new(path)).to_json(),
                        reason: reason.clone(),
                    })
                    .collect();
                let paths: Vec<String> = ctx.failed.keys().cloned().collect();

                changed += self
                    .bulk_write("record failed imports", &paths, || {
                        db::failed_imports::upsert_failed_imports(self.db(), library_id, &rows)
                    })
                    .await
                    .unwrap_or(0);

                // A comic that now fails to read loses its row
                if let Some(ids) = self
                    .bulk_write("delete failed comics", &paths, || {
                        db::comics::delete_comics(self.db(), library_id, &paths)
                    })
                    .await
                {
                    ctx.summary.deleted += ids.len();
                    ctx.cover_purge_ids.extend(ids);
                }
            }
            status.increment(ctx.failed.len());
            self.state.status.update(&mut status, false).await;

            let cleared: Vec<String> = known
                .iter()
                .filter(|p| {
                    !ctx.failed.contains_key(*p) && (ctx.comic_ids.contains_key(*p) || !Path::new(p).exists())
                })
                .cloned()
                .collect();
            if !cleared.is_empty() {
                changed += self
                    .bulk_write("clear failed imports", &cleared, || {
                        db::failed_imports::delete_failed_imports(self.db(), library_id, &cleared)
                    })
                    .await
                    .unwrap_or(0);
            }
            changed += self
                .bulk_write("sweep failed imports", &[], || {
                    db::failed_imports::delete_failed_with_comics(self.db(), Some(library_id))
                })
                .await
                .unwrap_or(0);
            status.increment(known.len());

            ctx.failed_imports_changed |= changed > 0;
            info!(
                library_id,
                failed = ctx.failed.len(),
                cleared = cleared.len(),
                "Recorded failed imports"
            );
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.state.status.finish(&status).await;
        result?;
        ctx.check_abort()
    }
}
