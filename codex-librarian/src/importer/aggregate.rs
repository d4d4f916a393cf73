//! Read metadata and aggregate it into comic records and FK candidates
//!
//! Extraction runs on the blocking pool in batches. Aggregation itself is a
//! pure function of the extracted metadata and the library root.

use super::{ImportContext, Importer};
use crate::db;
use crate::error::ExtractionError;
use crate::extractor::ExtractedMetadata;
use crate::models::{
    split_issue, ComicLinks, ComicRecord, CreditKey, FileStat, FkCandidates, GroupCounts, GroupTree,
    IdentifierKey, Library, LinkField, NamedKind, StoryArcKey,
};
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Paths handed to one blocking extraction task
const EXTRACT_BATCH_SIZE: usize = 100;

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_names(values: Vec<String>) -> BTreeSet<String> {
    values
        .into_iter()
        .filter_map(|v| clean(Some(v)))
        .collect()
}

/// Flatten one comic's extracted metadata and add its references to
/// `candidates`.
///
/// The date is merged up, the issue is split into number and suffix, the
/// title becomes the name, and missing group names become empty strings.
pub fn aggregate_metadata(
    library: &Library,
    path: &str,
    stat: FileStat,
    metadata: ExtractedMetadata,
    candidates: &mut FkCandidates,
) -> (ComicRecord, ComicLinks) {
    let (issue_number, issue_suffix) = clean(metadata.issue)
        .map(|issue| split_issue(&issue))
        .unwrap_or((None, String::new()));
    let date = metadata.date.unwrap_or_default();
    let file_type = clean(metadata.file_type)
        .or_else(|| {
            Path::new(path)
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
        })
        .unwrap_or_default();

    let group = GroupTree {
        publisher: clean(metadata.publisher).unwrap_or_default(),
        imprint: clean(metadata.imprint).unwrap_or_default(),
        series: clean(metadata.series).unwrap_or_default(),
        volume: clean(metadata.volume).unwrap_or_default(),
    };
    candidates
        .groups
        .entry(group.clone())
        .or_default()
        .merge(GroupCounts {
            series_volume_count: metadata.series_volume_count,
            volume_issue_count: metadata.volume_issue_count,
        });

    let mut links = ComicLinks::default();
    let named_fields = [
        (LinkField::Characters, metadata.characters),
        (LinkField::Genres, metadata.genres),
        (LinkField::Locations, metadata.locations),
        (LinkField::Tags, metadata.tags),
        (LinkField::Teams, metadata.teams),
        (LinkField::SeriesGroups, metadata.series_groups),
    ];
    for (field, values) in named_fields {
        let names = clean_names(values);
        if let Some(kind) = field.named_kind() {
            for name in &names {
                candidates.add_named(kind, name);
            }
        }
        links.named.insert(field, names);
    }

    for (arc, number) in metadata.story_arcs {
        let Some(arc) = clean(Some(arc)) else { continue };
        candidates.add_named(NamedKind::StoryArc, &arc);
        let key = StoryArcKey { arc, number };
        candidates.story_arc_numbers.insert(key.clone());
        links.story_arc_numbers.insert(key);
    }

    for credit in metadata.credits {
        let Some(person) = clean(Some(credit.person)) else { continue };
        let role = clean(credit.role);
        candidates.add_named(NamedKind::CreditPerson, &person);
        if let Some(role) = &role {
            candidates.add_named(NamedKind::CreditRole, role);
        }
        let key = CreditKey { person, role };
        candidates.credits.insert(key.clone());
        links.credits.insert(key);
    }

    for identifier in metadata.identifiers {
        let (Some(id_type), Some(key)) = (clean(Some(identifier.id_type)), clean(Some(identifier.key)))
        else {
            continue;
        };
        let source = clean(identifier.source);
        if let Some(source) = &source {
            candidates.add_named(NamedKind::IdentifierSource, source);
        }
        let key = IdentifierKey { source, id_type, key };
        let url = candidates.identifiers.entry(key.clone()).or_insert(None);
        if url.is_none() {
            *url = clean(identifier.url);
        }
        links.identifiers.insert(key);
    }

    let folders = library.ancestor_folders(path);
    candidates.folders.extend(folders.iter().cloned());
    links.folders = folders.into_iter().collect();

    let record = ComicRecord {
        path: path.to_string(),
        stat,
        name: clean(metadata.title).unwrap_or_default(),
        issue_number,
        issue_suffix,
        year: date.year,
        month: date.month,
        day: date.day,
        summary: clean(metadata.summary).unwrap_or_default(),
        notes: clean(metadata.notes).unwrap_or_default(),
        page_count: metadata.page_count.unwrap_or(0).max(0),
        language: clean(metadata.language),
        age_rating: clean(metadata.age_rating),
        critical_rating: metadata.critical_rating,
        file_type,
        group,
        parent_folder: library.parent_folder(path),
    };
    (record, links)
}

type Extracted = (String, FileStat, Result<ExtractedMetadata, ExtractionError>);

impl Importer {
    /// Paths whose metadata must be read this apply
    async fn paths_to_read(&self, ctx: &mut ImportContext) -> Result<BTreeSet<String>> {
        if ctx.library.covers_only {
            let ignored = ctx.diff.files.modified.len() + ctx.diff.files.created.len();
            if ignored > 0 {
                debug!(library_id = ctx.library_id(), ignored, "Covers-only library, ignoring comic files");
            }
            ctx.diff.files.modified.clear();
            ctx.diff.files.created.clear();
            return Ok(BTreeSet::new());
        }

        if ctx.force_import_metadata {
            let known = db::comics::library_comic_paths(self.db(), ctx.library_id()).await?;
            let deleted = &ctx.diff.files.deleted;
            let created = &ctx.diff.files.created;
            let forced: Vec<String> = known
                .into_iter()
                .filter(|p| !deleted.contains(p) && !created.contains(p))
                .collect();
            info!(library_id = ctx.library_id(), count = forced.len(), "Forcing metadata re-read");
            ctx.diff.files.modified.extend(forced);
        }

        Ok(ctx
            .diff
            .files
            .modified
            .iter()
            .chain(ctx.diff.files.created.iter())
            .cloned()
            .collect())
    }

    async fn extract_batch(&self, batch: Vec<String>) -> Vec<Extracted> {
        let extractor = self.extractor.clone();
        let paths = batch.clone();
        let handle = tokio::task::spawn_blocking(move || {
            paths
                .into_iter()
                .map(|path| {
                    let file = PathBuf::from(&path);
                    let stat = FileStat::from_path_lossy(&file);
                    let result = extractor.extract(&file);
                    (path, stat, result)
                })
                .collect::<Vec<_>>()
        });

        match handle.await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, paths = batch.len(), "Extraction task died");
                batch
                    .into_iter()
                    .map(|path| {
                        let stat = FileStat::from_path_lossy(Path::new(&path));
                        (path, stat, Err(ExtractionError::Task(e.to_string())))
                    })
                    .collect()
            }
        }
    }

    /// Read every modified and created comic, then aggregate
    pub(super) async fn read_metadata(&self, ctx: &mut ImportContext) -> Result<()> {
        let paths: Vec<String> = self.paths_to_read(ctx).await?.into_iter().collect();
        if paths.is_empty() {
            return Ok(());
        }

        let mut status = Status::new(StatusType::ReadMetadata, Some(paths.len()));
        self.state.status.start(&mut status).await;
        let mut extracted = Vec::with_capacity(paths.len());
        let mut result = Ok(());
        for batch in paths.chunks(EXTRACT_BATCH_SIZE) {
            if let Err(e) = ctx.check_abort() {
                result = Err(e);
                break;
            }
            extracted.extend(self.extract_batch(batch.to_vec()).await);
            status.increment(batch.len());
            self.state.status.update(&mut status, false).await;
        }
        self.state.status.finish(&status).await;
        result?;

        let mut status = Status::new(StatusType::AggregateMetadata, Some(extracted.len()));
        self.state.status.start(&mut status).await;
        for (path, stat, outcome) in extracted {
            match outcome {
                Ok(metadata) => {
                    let (record, links) =
                        aggregate_metadata(&ctx.library, &path, stat, metadata, &mut ctx.candidates);
                    ctx.records.insert(path.clone(), record);
                    ctx.links.insert(path, links);
                }
                Err(e) => {
                    debug!(path = %path, error = %e, "Metadata extraction failed");
                    ctx.failed.insert(path, e.to_string());
                }
            }
            status.increment(1);
        }
        ctx.summary.failed = ctx.failed.len();
        self.state.status.finish(&status).await;

        info!(
            library_id = ctx.library_id(),
            read = ctx.records.len(),
            failed = ctx.failed.len(),
            candidates = ctx.candidates.len(),
            "Aggregated metadata"
        );
        ctx.check_abort()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractedCredit, ExtractedDate, ExtractedIdentifier};

    fn library() -> Library {
        Library {
            id: 1,
            path: "/lib".to_string(),
            covers_only: false,
            update_in_progress: false,
        }
    }

    #[test]
    fn test_flattens_and_classifies() {
        let metadata = ExtractedMetadata {
            title: Some(" Pilot ".to_string()),
            issue: Some("1AU".to_string()),
            date: Some(ExtractedDate {
                year: Some(2019),
                month: Some(4),
                day: None,
            }),
            publisher: Some("Pub".to_string()),
            series: Some("Series".to_string()),
            volume: Some("v1".to_string()),
            volume_issue_count: Some(12),
            tags: vec!["horror".to_string(), " ".to_string()],
            story_arcs: [("Arc".to_string(), Some(2))].into(),
            credits: vec![
                ExtractedCredit {
                    person: "Writer Person".to_string(),
                    role: Some("Writer".to_string()),
                },
                ExtractedCredit {
                    person: "".to_string(),
                    role: Some("Letterer".to_string()),
                },
            ],
            identifiers: vec![ExtractedIdentifier {
                source: Some("comicvine".to_string()),
                id_type: "issue".to_string(),
                key: "4000-1".to_string(),
                url: Some("https://example.org/4000-1".to_string()),
            }],
            ..Default::default()
        };

        let mut candidates = FkCandidates::default();
        let (record, links) = aggregate_metadata(
            &library(),
            "/lib/Pub/Series v1/issue 1.cbz",
            FileStat::default(),
            metadata,
            &mut candidates,
        );

        assert_eq!(record.name, "Pilot");
        assert_eq!(record.issue_number, Some(1.0));
        assert_eq!(record.issue_suffix, "AU");
        assert_eq!(record.year, Some(2019));
        assert_eq!(record.file_type, "cbz");
        assert_eq!(record.group.imprint, "");
        assert_eq!(record.parent_folder.as_deref(), Some("/lib/Pub/Series v1"));

        let tree = GroupTree {
            publisher: "Pub".to_string(),
            imprint: String::new(),
            series: "Series".to_string(),
            volume: "v1".to_string(),
        };
        assert_eq!(candidates.groups[&tree].volume_issue_count, Some(12));
        assert_eq!(candidates.folders.len(), 2);
        assert_eq!(candidates.named[&NamedKind::Tag].len(), 1);
        assert!(candidates.named[&NamedKind::CreditRole].contains("Writer"));
        assert!(!candidates.named[&NamedKind::CreditRole].contains("Letterer"));
        assert_eq!(candidates.credits.len(), 1);
        assert_eq!(candidates.story_arc_numbers.len(), 1);
        assert_eq!(links.named[&LinkField::Tags].len(), 1);
        assert!(links.named[&LinkField::Genres].is_empty());
        assert_eq!(links.folders.len(), 2);
        assert_eq!(
            candidates.identifiers.values().next().cloned().flatten().as_deref(),
            Some("https://example.org/4000-1")
        );
    }

    #[test]
    fn test_counts_merge_to_max_across_comics() {
        let mut candidates = FkCandidates::default();
        for count in [Some(3), None, Some(7)] {
            let metadata = ExtractedMetadata {
                series: Some("S".to_string()),
                series_volume_count: count,
                ..Default::default()
            };
            aggregate_metadata(&library(), "/lib/a.cbz", FileStat::default(), metadata, &mut candidates);
        }
        assert_eq!(candidates.groups.len(), 1);
        let counts = candidates.groups.values().next().unwrap();
        assert_eq!(counts.series_volume_count, Some(7));
    }

    #[test]
    fn test_root_level_comic_has_no_folders() {
        let mut candidates = FkCandidates::default();
        let (record, links) = aggregate_metadata(
            &library(),
            "/lib/a.cbz",
            FileStat::default(),
            ExtractedMetadata::default(),
            &mut candidates,
        );
        assert!(record.parent_folder.is_none());
        assert!(links.folders.is_empty());
        assert!(candidates.folders.is_empty());
    }
}
