//! Create missing foreign-key rows in dependency order

use super::query::{credit_row_key, identifier_row_key, story_arc_row_key};
use super::{ImportContext, Importer};
use crate::db;
use crate::db::folders::NewFolder;
use crate::db::groups::{NewSeries, NewVolume, SeriesKey};
use crate::models::{sort_name, FileStat, GroupTree, Library};
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Last path component, or empty for a root
pub(crate) fn path_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn distinct_publishers<'a>(trees: impl Iterator<Item = &'a GroupTree>) -> Vec<String> {
    trees
        .map(|t| t.publisher.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl Importer {
    /// Make sure every folder in `paths`, and each of its ancestors inside
    /// the library, exists.
    ///
    /// Missing folders are created one depth level at a time, so a folder's
    /// parent always exists before the folder is inserted. Returns ids for
    /// every folder in the closure and the number created. The caller holds
    /// the write lock.
    pub(super) async fn ensure_folders(
        &self,
        library: &Library,
        paths: &BTreeSet<String>,
    ) -> Result<(HashMap<String, i64>, usize)> {
        let mut wanted: BTreeSet<String> = BTreeSet::new();
        for path in paths {
            if !library.contains(path) || Path::new(path) == library.root() {
                continue;
            }
            wanted.insert(path.clone());
            wanted.extend(library.ancestor_folders(path));
        }
        if wanted.is_empty() {
            return Ok((HashMap::new(), 0));
        }

        let all: Vec<String> = wanted.iter().cloned().collect();
        let mut ids = db::folders::folder_ids(self.db(), library.id, &all).await?;

        let mut by_depth: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for path in wanted {
            if !ids.contains_key(&path) {
                let depth = Path::new(&path).components().count();
                by_depth.entry(depth).or_default().push(path);
            }
        }

        let mut created = 0;
        for level in by_depth.into_values() {
            let mut rows = Vec::with_capacity(level.len());
            for path in &level {
                let parent_folder_id = match library.parent_folder(path) {
                    Some(parent) => match ids.get(&parent) {
                        Some(id) => Some(*id),
                        None => {
                            warn!(path = %path, parent = %parent, "Parent folder missing, skipping folder");
                            continue;
                        }
                    },
                    None => None,
                };
                let name = path_name(path);
                rows.push(NewFolder {
                    path: path.clone(),
                    sort_name: sort_name(&name),
                    name,
                    parent_folder_id,
                    stat: FileStat::from_path_lossy(Path::new(path)).to_json(),
                });
            }
            if rows.is_empty() {
                continue;
            }

            let written = self
                .bulk_write("create folders", &level, || {
                    db::folders::insert_folders(self.db(), library.id, &rows)
                })
                .await;
            if written.is_some() {
                created += rows.len();
            }
            ids.extend(db::folders::folder_ids(self.db(), library.id, &level).await?);
        }

        if created > 0 {
            info!(library_id = library.id, model = "folder", count = created, "Created missing rows");
        }
        Ok((ids, created))
    }

    pub(super) async fn create_missing_fks(&self, ctx: &mut ImportContext) -> Result<()> {
        let raises = ctx.missing.series_count_raises.len() + ctx.missing.volume_count_raises.len();
        let total = ctx.missing.candidates.len() + raises;
        if total == 0 {
            return Ok(());
        }

        let mut status = Status::new(StatusType::CreateFks, Some(total));
        self.state.status.start(&mut status).await;

        let result = async {
            let _lock = self.state.write_lock.lock().await;
            self.create_groups(ctx, &mut status).await?;
            ctx.check_abort()?;
            self.create_folders(ctx, &mut status).await?;
            ctx.check_abort()?;
            self.create_named(ctx, &mut status).await?;
            ctx.check_abort()?;
            self.create_compound(ctx, &mut status).await
        }
        .await;

        self.state.status.finish(&status).await;
        result
    }

    /// Publishers, then imprints, then series, then volumes. Each level is
    /// re-queried after insert so the next level can reference it.
    async fn create_groups(&self, ctx: &mut ImportContext, status: &mut Status) -> Result<()> {
        let db = self.db();
        let library_id = ctx.library_id();
        let missing = &ctx.missing.candidates.groups;
        let fks = &mut ctx.fks;

        if !missing.is_empty() {
            let publishers = distinct_publishers(missing.keys());

            let names: Vec<String> = publishers
                .iter()
                .filter(|p| !fks.publishers.contains_key(*p))
                .cloned()
                .collect();
            if !names.is_empty() {
                if self
                    .bulk_write("create publishers", &[], || db::groups::insert_publishers(db, &names))
                    .await
                    .is_some()
                {
                    info!(library_id, model = "publisher", count = names.len(), "Created missing rows");
                    ctx.summary.fks_created += names.len();
                }
                fks.publishers.extend(db::groups::publisher_ids(db, &names).await?);
            }

            let mut imprints: BTreeSet<(i64, String)> = BTreeSet::new();
            for tree in missing.keys() {
                if fks.imprints.contains_key(&tree.imprint_key()) {
                    continue;
                }
                match fks.publishers.get(&tree.publisher) {
                    Some(id) => {
                        imprints.insert((*id, tree.imprint.clone()));
                    }
                    None => warn!(publisher = %tree.publisher, "Publisher unresolved, skipping imprint"),
                }
            }
            if !imprints.is_empty() {
                let rows: Vec<(i64, String)> = imprints.into_iter().collect();
                if self
                    .bulk_write("create imprints", &[], || db::groups::insert_imprints(db, &rows))
                    .await
                    .is_some()
                {
                    info!(library_id, model = "imprint", count = rows.len(), "Created missing rows");
                    ctx.summary.fks_created += rows.len();
                }
                fks.imprints.extend(db::groups::imprint_ids(db, &publishers).await?);
            }

            let mut series: BTreeMap<SeriesKey, NewSeries> = BTreeMap::new();
            for (tree, counts) in missing {
                let key = tree.series_key();
                if fks.series.contains_key(&key) {
                    continue;
                }
                let (Some(publisher_id), Some(imprint_id)) = (
                    fks.publishers.get(&tree.publisher),
                    fks.imprints.get(&tree.imprint_key()),
                ) else {
                    warn!(series = %tree.series, "Imprint unresolved, skipping series");
                    continue;
                };
                let row = series.entry(key).or_insert_with(|| NewSeries {
                    publisher_id: *publisher_id,
                    imprint_id: *imprint_id,
                    name: tree.series.clone(),
                    volume_count: None,
                });
                row.volume_count = row.volume_count.max(counts.series_volume_count);
            }
            if !series.is_empty() {
                let rows: Vec<NewSeries> = series.into_values().collect();
                if self
                    .bulk_write("create series", &[], || db::groups::insert_series(db, &rows))
                    .await
                    .is_some()
                {
                    info!(library_id, model = "series", count = rows.len(), "Created missing rows");
                    ctx.summary.fks_created += rows.len();
                }
                fks.series.extend(db::groups::series_rows(db, &publishers).await?);
            }

            let mut volumes = Vec::new();
            for (tree, counts) in missing {
                let (Some(publisher_id), Some(imprint_id), Some(series)) = (
                    fks.publishers.get(&tree.publisher),
                    fks.imprints.get(&tree.imprint_key()),
                    fks.series.get(&tree.series_key()),
                ) else {
                    warn!(volume = %tree.volume, series = %tree.series, "Series unresolved, skipping volume");
                    continue;
                };
                volumes.push(NewVolume {
                    publisher_id: *publisher_id,
                    imprint_id: *imprint_id,
                    series_id: series.id,
                    name: tree.volume.clone(),
                    issue_count: counts.volume_issue_count,
                });
            }
            if !volumes.is_empty() {
                if self
                    .bulk_write("create volumes", &[], || db::groups::insert_volumes(db, &volumes))
                    .await
                    .is_some()
                {
                    info!(library_id, model = "volume", count = volumes.len(), "Created missing rows");
                    ctx.summary.fks_created += volumes.len();
                }
                fks.volumes.extend(db::groups::volume_rows(db, &publishers).await?);
            }
            status.increment(missing.len());
            self.state.status.update(status, false).await;
        }

        let series_raises = &ctx.missing.series_count_raises;
        let volume_raises = &ctx.missing.volume_count_raises;
        if !series_raises.is_empty() {
            if let Some(n) = self
                .bulk_write("raise series counts", &[], || {
                    db::groups::raise_series_volume_counts(db, series_raises)
                })
                .await
            {
                info!(library_id, model = "series", count = n, "Raised volume counts");
            }
        }
        if !volume_raises.is_empty() {
            if let Some(n) = self
                .bulk_write("raise volume counts", &[], || {
                    db::groups::raise_volume_issue_counts(db, volume_raises)
                })
                .await
            {
                info!(library_id, model = "volume", count = n, "Raised issue counts");
            }
        }
        status.increment(series_raises.len() + volume_raises.len());
        self.state.status.update(status, false).await;
        Ok(())
    }

    async fn create_folders(&self, ctx: &mut ImportContext, status: &mut Status) -> Result<()> {
        let folders = &ctx.missing.candidates.folders;
        if folders.is_empty() {
            return Ok(());
        }
        let (ids, created) = self.ensure_folders(&ctx.library, folders).await?;
        status.increment(folders.len());
        ctx.fks.folders.extend(ids);
        ctx.summary.folders_created += created;
        self.state.status.update(status, false).await;
        Ok(())
    }

    async fn create_named(&self, ctx: &mut ImportContext, status: &mut Status) -> Result<()> {
        let library_id = ctx.library_id();
        for (kind, names) in &ctx.missing.candidates.named {
            let rows: Vec<String> = names.iter().cloned().collect();
            if let Some(n) = self
                .bulk_write("create named rows", &[], || {
                    db::named::insert_named(self.db(), *kind, &rows)
                })
                .await
            {
                info!(library_id, model = kind.table(), count = n, "Created missing rows");
                ctx.summary.fks_created += n as usize;
            }
            self.lookup_named(*kind, names, &mut ctx.fks).await?;
            status.increment(names.len());
            self.state.status.update(status, false).await;
            ctx.check_abort()?;
        }
        Ok(())
    }

    /// Credits, story arc numbers and identifiers. Runs last because each
    /// references named rows created above.
    async fn create_compound(&self, ctx: &mut ImportContext, status: &mut Status) -> Result<()> {
        let db = self.db();
        let library_id = ctx.library_id();
        let missing = &ctx.missing.candidates;
        let fks = &mut ctx.fks;

        let credits: Vec<(i64, Option<i64>)> = missing
            .credits
            .iter()
            .filter_map(|k| credit_row_key(fks, k))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if credits.len() < missing.credits.len() {
            warn!(
                library_id,
                skipped = missing.credits.len() - credits.len(),
                "Credit person or role unresolved, skipping credits"
            );
        }
        if !credits.is_empty() {
            if let Some(n) = self
                .bulk_write("create credits", &[], || db::named::insert_credits(db, &credits))
                .await
            {
                info!(library_id, model = "credit", count = n, "Created missing rows");
                ctx.summary.fks_created += n as usize;
            }
        }

        let arcs: Vec<(i64, Option<i64>)> = missing
            .story_arc_numbers
            .iter()
            .filter_map(|k| story_arc_row_key(fks, k))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !arcs.is_empty() {
            if let Some(n) = self
                .bulk_write("create story arc numbers", &[], || {
                    db::named::insert_story_arc_numbers(db, &arcs)
                })
                .await
            {
                info!(library_id, model = "story_arc_number", count = n, "Created missing rows");
                ctx.summary.fks_created += n as usize;
            }
        }

        let identifiers: Vec<_> = missing
            .identifiers
            .iter()
            .filter_map(|(k, url)| identifier_row_key(fks, k).map(|row| (row, url.clone())))
            .collect();
        if !identifiers.is_empty() {
            if let Some(n) = self
                .bulk_write("create identifiers", &[], || {
                    db::named::insert_identifiers(db, &identifiers)
                })
                .await
            {
                info!(library_id, model = "identifier", count = n, "Created missing rows");
                ctx.summary.fks_created += n as usize;
            }
        }

        self.lookup_compound(missing, fks).await?;
        status.increment(missing.credits.len() + missing.story_arc_numbers.len() + missing.identifiers.len());
        self.state.status.update(status, false).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_name() {
        assert_eq!(path_name("/lib/Pub/Series v1"), "Series v1");
        assert_eq!(path_name("/"), "");
    }
}
