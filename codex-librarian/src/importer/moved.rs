//! Moves and directory stat updates
//!
//! Moves rewrite paths in place so primary keys, and everything keyed on
//! them, survive. A move whose source is unknown becomes a create of its
//! destination.

use super::covers::classify_cover;
use super::create::path_name;
use super::{ImportContext, Importer};
use crate::db;
use crate::db::custom_covers::{CoverGroup, NewCustomCover};
use crate::models::{sort_name, FileStat};
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

fn stat_json(path: &str) -> String {
    FileStat::from_path_lossy(Path::new(path)).to_json()
}

impl Importer {
    pub(super) async fn move_paths(&self, ctx: &mut ImportContext) -> Result<()> {
        self.move_dirs(ctx).await?;
        self.move_files(ctx).await?;
        self.move_covers(ctx).await?;
        Ok(())
    }

    /// Move folder trees. Shallow sources go first; a nested move already
    /// carried along by its parent finds nothing at its source and is skipped.
    async fn move_dirs(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.diff.dirs.moved.is_empty() {
            return Ok(());
        }
        let mut moves: Vec<(String, String)> = ctx
            .diff
            .dirs
            .moved
            .iter()
            .map(|(s, d)| (s.clone(), d.clone()))
            .collect();
        moves.sort_by_key(|(src, _)| Path::new(src).components().count());

        let mut status = Status::new(StatusType::DirsMoved, Some(moves.len()));
        self.state.status.start(&mut status).await;

        let result = async {
            let _lock = self.state.write_lock.lock().await;
            let library_id = ctx.library_id();
            for (src, dest) in &moves {
                ctx.check_abort()?;

                let parents: BTreeSet<String> = ctx.library.parent_folder(dest).into_iter().collect();
                let (parent_ids, created) = self.ensure_folders(&ctx.library, &parents).await?;
                ctx.summary.folders_created += created;
                let parent_id = ctx
                    .library
                    .parent_folder(dest)
                    .and_then(|p| parent_ids.get(&p).copied());

                let sample = [src.clone(), dest.clone()];
                let moved = self
                    .bulk_write("move folder tree", &sample, || {
                        db::folders::move_tree(self.db(), library_id, src, dest)
                    })
                    .await;

                match moved {
                    Some(0) => {
                        debug!(src = %src, dest = %dest, "Moved folder unknown, creating destination");
                        let dest_set: BTreeSet<String> = [dest.clone()].into();
                        let (_, created) = self.ensure_folders(&ctx.library, &dest_set).await?;
                        ctx.summary.folders_created += created;
                    }
                    Some(count) => {
                        let name = path_name(dest);
                        let stat = stat_json(dest);
                        let sorted_name = sort_name(&name);
                        self.bulk_write("reparent folder", &sample, || {
                            db::folders::reparent_folder(
                                self.db(),
                                library_id,
                                dest,
                                parent_id,
                                &name,
                                &sorted_name,
                                &stat,
                            )
                        })
                        .await;
                        let comic_ids = db::folders::comic_ids_in_tree(self.db(), library_id, dest).await?;
                        ctx.moved_comic_ids.extend(comic_ids);
                        ctx.summary.moved += count as usize;
                    }
                    None => {}
                }
                status.increment(1);
                self.state.status.update(&mut status, false).await;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.state.status.finish(&status).await;
        if result.is_ok() {
            info!(library_id = ctx.library_id(), count = moves.len(), "Moved folders");
        }
        result
    }

    async fn move_files(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.diff.files.moved.is_empty() {
            return Ok(());
        }
        let moves: Vec<(String, String)> = ctx
            .diff
            .files
            .moved
            .iter()
            .map(|(s, d)| (s.clone(), d.clone()))
            .collect();

        let mut status = Status::new(StatusType::FilesMoved, Some(moves.len()));
        self.state.status.start(&mut status).await;

        let result = async {
            let _lock = self.state.write_lock.lock().await;
            let library_id = ctx.library_id();
            let parents: BTreeSet<String> = moves
                .iter()
                .filter_map(|(_, dest)| ctx.library.parent_folder(dest))
                .collect();
            let (parent_ids, created) = self.ensure_folders(&ctx.library, &parents).await?;
            ctx.summary.folders_created += created;

            let mut converted = 0;
            for (src, dest) in &moves {
                let parent_id = ctx
                    .library
                    .parent_folder(dest)
                    .and_then(|p| parent_ids.get(&p).copied());
                let stat = stat_json(dest);
                let sample = [src.clone(), dest.clone()];
                let moved = self
                    .bulk_write("move comic", &sample, || {
                        db::comics::move_comic(self.db(), library_id, src, dest, parent_id, &stat)
                    })
                    .await;

                match moved {
                    Some(Some(id)) => {
                        ctx.moved_comic_ids.insert(id);
                        ctx.summary.moved += 1;
                    }
                    Some(None) => {
                        // Unknown source, possibly a failed import: retry it as new
                        let src_only = [src.clone()];
                        self.bulk_write("drop moved failed import", &src_only, || {
                            db::failed_imports::delete_failed_imports(self.db(), library_id, &src_only)
                        })
                        .await;
                        ctx.diff.files.created.insert(dest.clone());
                        converted += 1;
                    }
                    None => {}
                }
                status.increment(1);
                if status.complete % 100 == 0 {
                    ctx.check_abort()?;
                }
                self.state.status.update(&mut status, false).await;
            }

            info!(
                library_id,
                moved = moves.len() - converted,
                converted_to_create = converted,
                "Moved comics"
            );
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.state.status.finish(&status).await;
        result?;
        ctx.check_abort()
    }

    async fn move_covers(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.diff.covers.moved.is_empty() {
            return Ok(());
        }
        let moves: Vec<(String, String)> = ctx
            .diff
            .covers
            .moved
            .iter()
            .map(|(s, d)| (s.clone(), d.clone()))
            .collect();

        let mut status = Status::new(StatusType::CoversMoved, Some(moves.len()));
        self.state.status.start(&mut status).await;

        let result = async {
            let _lock = self.state.write_lock.lock().await;
            let library_id = ctx.library_id();
            for (src, dest) in &moves {
                let sample = [src.clone(), dest.clone()];
                let Some(cover) = classify_cover(&ctx.library, dest, stat_json(dest)) else {
                    // Moved somewhere it is no longer a cover
                    let src_only = [src.clone()];
                    if let Some(ids) = self
                        .bulk_write("delete moved cover", &sample, || {
                            db::custom_covers::delete_covers(self.db(), library_id, &src_only)
                        })
                        .await
                    {
                        ctx.custom_cover_purge_ids.extend(ids);
                    }
                    continue;
                };

                let moved = self
                    .bulk_write("move cover", &sample, || {
                        db::custom_covers::move_cover(self.db(), library_id, src, &cover)
                    })
                    .await;
                match moved {
                    Some(Some(id)) => {
                        self.link_cover(library_id, &cover, id).await;
                        ctx.custom_cover_regenerate_ids.insert(id);
                        ctx.summary.covers_changed += 1;
                    }
                    Some(None) => {
                        ctx.diff.covers.created.insert(dest.clone());
                    }
                    None => {}
                }
                status.increment(1);
                self.state.status.update(&mut status, false).await;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.state.status.finish(&status).await;
        result?;
        ctx.check_abort()
    }

    /// Refresh stats of modified folders and create folders that appeared
    pub(super) async fn update_modified_dirs(&self, ctx: &mut ImportContext) -> Result<()> {
        let modified: Vec<String> = ctx.diff.dirs.modified.iter().cloned().collect();
        let created = ctx.diff.dirs.created.clone();
        if modified.is_empty() && created.is_empty() {
            return Ok(());
        }

        let mut status = Status::new(StatusType::DirsModified, Some(modified.len() + created.len()));
        self.state.status.start(&mut status).await;

        let result = async {
            let _lock = self.state.write_lock.lock().await;
            let library_id = ctx.library_id();
            let mut unknown: BTreeSet<String> = created;
            let mut updated = 0;
            for path in &modified {
                let stat = stat_json(path);
                let sample = [path.clone()];
                match self
                    .bulk_write("update folder stat", &sample, || {
                        db::folders::update_folder_stat(self.db(), library_id, path, &stat)
                    })
                    .await
                {
                    Some(0) => {
                        unknown.insert(path.clone());
                    }
                    Some(_) => updated += 1,
                    None => {}
                }
            }
            status.increment(modified.len());
            self.state.status.update(&mut status, false).await;

            let (_, folders_created) = self.ensure_folders(&ctx.library, &unknown).await?;
            ctx.summary.folders_created += folders_created;
            status.increment(unknown.len());

            info!(library_id, updated, created = folders_created, "Updated folders");
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.state.status.finish(&status).await;
        result?;
        ctx.check_abort()
    }

    /// Point a cover at the groups or folder it decorates
    pub(super) async fn link_cover(&self, library_id: i64, cover: &NewCustomCover, id: i64) {
        let sample = [cover.path.clone()];
        match cover.group {
            CoverGroup::Folder => {
                if let Some(folder) = Path::new(&cover.path).parent() {
                    let folder = folder.to_string_lossy().into_owned();
                    self.bulk_write("link folder cover", &sample, || {
                        db::custom_covers::link_folder_cover(self.db(), library_id, &folder, id)
                    })
                    .await;
                }
            }
            group => {
                self.bulk_write("link group cover", &sample, || {
                    db::custom_covers::link_group_cover(self.db(), group, id, &cover.sort_name)
                })
                .await;
            }
        }
    }
}
