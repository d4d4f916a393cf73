//! Custom cover images
//!
//! In a covers-only library the first directory under the root names the
//! group kind (`publishers/`, `imprints/`, `series/`, `story-arcs/`) and the
//! image stem names the group. Anywhere else, an image called `.codex-cover`
//! decorates the folder that contains it.

use super::create::path_name;
use super::{ImportContext, Importer};
use crate::db;
use crate::db::custom_covers::{CoverGroup, NewCustomCover};
use crate::models::{sort_name, FileStat, Library};
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// File stem marking a folder cover
pub const FOLDER_COVER_STEM: &str = ".codex-cover";

fn group_for_dir(name: &str) -> Option<CoverGroup> {
    match name.to_ascii_lowercase().as_str() {
        "publishers" => Some(CoverGroup::Publisher),
        "imprints" => Some(CoverGroup::Imprint),
        "series" => Some(CoverGroup::Series),
        "story-arcs" | "story_arcs" | "storyarcs" => Some(CoverGroup::StoryArc),
        _ => None,
    }
}

/// Work out what an image decorates. `None` if it is not a cover.
pub fn classify_cover(library: &Library, path: &str, stat: String) -> Option<NewCustomCover> {
    let file = Path::new(path);
    let ext = file.extension()?.to_str()?.to_ascii_lowercase();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let stem = file.file_stem()?.to_str()?;

    if stem == FOLDER_COVER_STEM {
        let folder = file.parent()?;
        if !folder.starts_with(library.root()) || folder == library.root() {
            return None;
        }
        let name = path_name(&folder.to_string_lossy());
        return Some(NewCustomCover {
            path: path.to_string(),
            sort_name: sort_name(&name),
            name,
            group: CoverGroup::Folder,
            stat,
        });
    }

    if !library.covers_only {
        return None;
    }
    let relative = file.strip_prefix(library.root()).ok()?;
    let mut components = relative.components();
    let group_dir = components.next()?.as_os_str().to_str()?;
    let group = group_for_dir(group_dir)?;
    // Exactly one level below the group directory
    if components.count() != 1 {
        return None;
    }

    Some(NewCustomCover {
        path: path.to_string(),
        name: stem.to_string(),
        sort_name: sort_name(stem),
        group,
        stat,
    })
}

impl Importer {
    /// Upsert covers that were modified or created and link them
    pub(super) async fn import_custom_covers(&self, ctx: &mut ImportContext) -> Result<()> {
        let phases = [
            (StatusType::CoversModified, ctx.diff.covers.modified.clone()),
            (StatusType::CoversCreated, ctx.diff.covers.created.clone()),
        ];
        let mut linked_any = false;

        for (status_type, paths) in phases {
            if paths.is_empty() {
                continue;
            }
            linked_any |= self.upsert_covers(ctx, status_type, &paths).await?;
            ctx.check_abort()?;
        }

        if linked_any {
            let _lock = self.state.write_lock.lock().await;
            if let Some(n) = self
                .bulk_write("link unlinked groups", &[], || {
                    db::custom_covers::link_unlinked_groups(self.db())
                })
                .await
            {
                debug!(count = n, "Linked covers to new groups");
            }
        }
        Ok(())
    }

    async fn upsert_covers(
        &self,
        ctx: &mut ImportContext,
        status_type: StatusType,
        paths: &BTreeSet<String>,
    ) -> Result<bool> {
        let mut status = Status::new(status_type, Some(paths.len()));
        self.state.status.start(&mut status).await;

        let library_id = ctx.library_id();
        let covers: Vec<NewCustomCover> = paths
            .iter()
            .filter_map(|p| {
                let stat = FileStat::from_path_lossy(Path::new(p)).to_json();
                let cover = classify_cover(&ctx.library, p, stat);
                if cover.is_none() {
                    debug!(path = %p, "Not a custom cover, skipping");
                }
                cover
            })
            .collect();

        let mut written = Vec::new();
        if !covers.is_empty() {
            let _lock = self.state.write_lock.lock().await;
            let sample: Vec<String> = covers.iter().map(|c| c.path.clone()).collect();
            if let Some(rows) = self
                .bulk_write("upsert custom covers", &sample, || {
                    db::custom_covers::upsert_covers(self.db(), library_id, &covers)
                })
                .await
            {
                written = rows;
            }
            for (path, id) in &written {
                if let Some(cover) = covers.iter().find(|c| &c.path == path) {
                    self.link_cover(library_id, cover, *id).await;
                }
                ctx.custom_cover_regenerate_ids.insert(*id);
            }
        }

        ctx.summary.covers_changed += written.len();
        status.increment(paths.len());
        self.state.status.finish(&status).await;
        info!(library_id, status = status_type.code(), count = written.len(), "Imported custom covers");
        Ok(!written.is_empty())
    }
}
