//! Many-to-many link reconciliation
//!
//! For each junction table the desired target set of every touched comic is
//! compared with what is stored. Only the difference is written, so a second
//! apply of the same metadata writes nothing.

use super::{ImportContext, Importer};
use crate::db;
use crate::models::{ComicLinks, LinkField};
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Desired targets per comic for one field
type FieldTargets = BTreeMap<i64, BTreeSet<i64>>;

/// Stale and new pairs for one field
#[derive(Debug, Default, PartialEq)]
pub(super) struct LinkPatch {
    pub stale: Vec<(i64, Vec<i64>)>,
    pub new: Vec<(i64, i64)>,
}

impl LinkPatch {
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.new.is_empty()
    }
}

/// Difference between desired and existing targets. Comics absent from
/// `desired` are left alone.
pub(super) fn diff_links(desired: &FieldTargets, existing: &HashMap<i64, BTreeSet<i64>>) -> LinkPatch {
    let empty = BTreeSet::new();
    let mut patch = LinkPatch::default();
    for (comic_id, want) in desired {
        let have = existing.get(comic_id).unwrap_or(&empty);
        let stale: Vec<i64> = have.difference(want).copied().collect();
        if !stale.is_empty() {
            patch.stale.push((*comic_id, stale));
        }
        patch
            .new
            .extend(want.difference(have).map(|target| (*comic_id, *target)));
    }
    patch
}

fn field_targets(ctx: &ImportContext, field: LinkField, links: &ComicLinks) -> BTreeSet<i64> {
    let fks = &ctx.fks;
    match field {
        LinkField::StoryArcNumbers => links
            .story_arc_numbers
            .iter()
            .filter_map(|k| fks.story_arc_numbers.get(k).copied())
            .collect(),
        LinkField::Credits => links
            .credits
            .iter()
            .filter_map(|k| fks.credits.get(k).copied())
            .collect(),
        LinkField::Identifiers => links
            .identifiers
            .iter()
            .filter_map(|k| fks.identifiers.get(k).copied())
            .collect(),
        LinkField::Folders => links
            .folders
            .iter()
            .filter_map(|p| fks.folders.get(p).copied())
            .collect(),
        named => {
            let Some(kind) = named.named_kind() else {
                return BTreeSet::new();
            };
            links
                .named
                .get(&named)
                .map(|names| names.iter().filter_map(|n| fks.named_id(kind, n)).collect())
                .unwrap_or_default()
        }
    }
}

impl Importer {
    /// Folder targets of moved comics that were not re-read
    async fn moved_folder_targets(&self, ctx: &ImportContext) -> Result<FieldTargets> {
        let reread: BTreeSet<i64> = ctx.comic_ids.values().copied().collect();
        let ids: Vec<i64> = ctx.moved_comic_ids.difference(&reread).copied().collect();
        if ids.is_empty() {
            return Ok(FieldTargets::new());
        }

        let paths = db::comics::comic_paths(self.db(), &ids).await?;
        let ancestors: Vec<(i64, Vec<String>)> = paths
            .into_iter()
            .map(|(id, path)| (id, ctx.library.ancestor_folders(&path)))
            .collect();
        let folder_paths: Vec<String> = ancestors
            .iter()
            .flat_map(|(_, folders)| folders.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let folder_ids = db::folders::folder_ids(self.db(), ctx.library_id(), &folder_paths).await?;

        Ok(ancestors
            .into_iter()
            .map(|(id, folders)| {
                let targets = folders
                    .iter()
                    .filter_map(|p| folder_ids.get(p).copied())
                    .collect();
                (id, targets)
            })
            .collect())
    }

    pub(super) async fn link_metadata(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.comic_ids.is_empty() && ctx.moved_comic_ids.is_empty() {
            return Ok(());
        }
        let library_id = ctx.library_id();
        let moved_folders = self.moved_folder_targets(ctx).await?;

        let mut status = Status::new(StatusType::LinkMetadata, Some(LinkField::ALL.len()));
        self.state.status.start(&mut status).await;

        let result = async {
            let mut touched: BTreeSet<i64> = BTreeSet::new();
            for field in LinkField::ALL {
                ctx.check_abort()?;

                let mut desired: FieldTargets = ctx
                    .links
                    .iter()
                    .filter_map(|(path, links)| {
                        let id = ctx.comic_ids.get(path)?;
                        Some((*id, field_targets(ctx, field, links)))
                    })
                    .collect();
                if field == LinkField::Folders {
                    desired.extend(moved_folders.iter().map(|(id, t)| (*id, t.clone())));
                }
                if desired.is_empty() {
                    status.increment(1);
                    continue;
                }

                let comic_ids: Vec<i64> = desired.keys().copied().collect();
                let existing = db::links::existing_links(self.db(), field, &comic_ids).await?;
                let patch = diff_links(&desired, &existing);
                if !patch.is_empty() {
                    let _lock = self.state.write_lock.lock().await;
                    let table = field.junction_table().to_string();
                    let sample = [table];
                    let deleted = self
                        .bulk_write("delete stale links", &sample, || {
                            db::links::delete_links(self.db(), field, &patch.stale)
                        })
                        .await
                        .unwrap_or(0);
                    let inserted = self
                        .bulk_write("insert links", &sample, || {
                            db::links::insert_links(self.db(), field, &patch.new)
                        })
                        .await
                        .unwrap_or(0);
                    debug!(table = field.junction_table(), deleted, inserted, "Patched links");
                    if field != LinkField::Folders {
                        touched.extend(patch.stale.iter().map(|(id, _)| *id));
                        touched.extend(patch.new.iter().map(|(id, _)| *id));
                    }
                    ctx.summary.links_changed += (deleted + inserted) as usize;
                }

                status.increment(1);
                self.state.status.update(&mut status, false).await;
            }

            if !touched.is_empty() {
                let ids: Vec<i64> = touched.into_iter().collect();
                let _lock = self.state.write_lock.lock().await;
                self.bulk_write("touch relinked comics", &[], || {
                    db::comics::touch_comics(self.db(), &ids)
                })
                .await;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.state.status.finish(&status).await;
        result?;
        info!(library_id, changed = ctx.summary.links_changed, "Linked metadata");
        ctx.check_abort()
    }
}
