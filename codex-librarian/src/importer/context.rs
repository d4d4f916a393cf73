//! Per-apply import state
//!
//! One `ImportContext` lives for one `Importer::apply` call. Each phase reads
//! what earlier phases produced and fills in its own fields.

use crate::db::comics::ComicForeignKeys;
use crate::db::groups::{CountedRow, ImprintKey, SeriesKey};
use crate::diff::Diff;
use crate::error::Aborted;
use crate::models::{
    ComicLinks, ComicRecord, CreditKey, FkCandidates, GroupTree, IdentifierKey, Library, NamedKind,
    StoryArcKey,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome counts of one apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub library_id: i64,
    /// Comics inserted
    pub created: usize,
    /// Comics whose row changed
    pub updated: usize,
    /// Comics re-read whose row already matched
    pub unchanged: usize,
    pub deleted: usize,
    /// Paths that failed extraction in this apply
    pub failed: usize,
    pub moved: usize,
    pub folders_created: usize,
    pub folders_deleted: usize,
    pub fks_created: usize,
    pub links_changed: usize,
    pub covers_changed: usize,
    /// Filesystem settled before the timeout
    pub settled: bool,
    pub aborted: bool,
}

impl ImportSummary {
    /// True if anything in the library's browsable data changed
    pub fn library_changed(&self) -> bool {
        self.created
            + self.updated
            + self.deleted
            + self.moved
            + self.folders_created
            + self.folders_deleted
            + self.links_changed
            + self.covers_changed
            > 0
    }
}

/// Primary keys for every candidate, after creation
#[derive(Debug, Default)]
pub struct ResolvedFks {
    pub publishers: HashMap<String, i64>,
    pub imprints: HashMap<ImprintKey, i64>,
    pub series: HashMap<SeriesKey, CountedRow>,
    pub volumes: HashMap<GroupTree, CountedRow>,
    pub folders: HashMap<String, i64>,
    pub named: HashMap<NamedKind, HashMap<String, i64>>,
    pub credits: HashMap<CreditKey, i64>,
    pub story_arc_numbers: HashMap<StoryArcKey, i64>,
    pub identifiers: HashMap<IdentifierKey, i64>,
}

impl ResolvedFks {
    /// Foreign keys for a comic, or `None` if any required row is missing
    pub fn comic_fks(&self, record: &ComicRecord) -> Option<ComicForeignKeys> {
        let tree = &record.group;
        let parent_folder_id = match &record.parent_folder {
            Some(path) => Some(*self.folders.get(path)?),
            None => None,
        };
        Some(ComicForeignKeys {
            publisher_id: *self.publishers.get(&tree.publisher)?,
            imprint_id: *self.imprints.get(&tree.imprint_key())?,
            series_id: self.series.get(&tree.series_key())?.id,
            volume_id: self.volumes.get(tree)?.id,
            parent_folder_id,
        })
    }

    pub fn named_id(&self, kind: NamedKind, name: &str) -> Option<i64> {
        self.named.get(&kind).and_then(|m| m.get(name)).copied()
    }
}

/// Rows the query phase found missing, plus count raises on existing groups
#[derive(Debug, Default)]
pub struct MissingFks {
    pub candidates: FkCandidates,
    /// `(series_id, declared volume_count)`
    pub series_count_raises: Vec<(i64, i64)>,
    /// `(volume_id, declared issue_count)`
    pub volume_count_raises: Vec<(i64, i64)>,
}

#[derive(Debug)]
pub struct ImportContext {
    pub library: Library,
    pub diff: Diff,
    pub force_import_metadata: bool,
    pub abort: CancellationToken,

    /// Successfully read comics by path
    pub records: BTreeMap<String, ComicRecord>,
    pub links: BTreeMap<String, ComicLinks>,
    pub candidates: FkCandidates,
    /// Extraction failures, path to reason
    pub failed: BTreeMap<String, String>,

    pub missing: MissingFks,
    pub fks: ResolvedFks,
    /// Paths with an existing comic row
    pub update_paths: BTreeSet<String>,
    /// Paths needing a new comic row
    pub create_paths: BTreeSet<String>,

    /// Ids of every aggregated comic after upsert
    pub comic_ids: HashMap<String, i64>,
    /// Comics whose folder links must be recomputed after a move
    pub moved_comic_ids: BTreeSet<i64>,
    /// Comics written this apply, for group count propagation
    pub written_comic_ids: BTreeSet<i64>,
    /// Comic ids whose cached cover must be removed
    pub cover_purge_ids: BTreeSet<i64>,
    /// Comic ids whose cover must be regenerated
    pub cover_regenerate_ids: BTreeSet<i64>,
    /// Custom cover ids whose thumbnail must be regenerated or removed
    pub custom_cover_regenerate_ids: BTreeSet<i64>,
    pub custom_cover_purge_ids: BTreeSet<i64>,
    pub failed_imports_changed: bool,

    pub summary: ImportSummary,
}

impl ImportContext {
    pub fn new(library: Library, diff: Diff, force_import_metadata: bool, abort: CancellationToken) -> Self {
        let summary = ImportSummary {
            run_id: Uuid::new_v4(),
            library_id: library.id,
            ..Default::default()
        };
        Self {
            library,
            diff,
            force_import_metadata,
            abort,
            records: BTreeMap::new(),
            links: BTreeMap::new(),
            candidates: FkCandidates::default(),
            failed: BTreeMap::new(),
            missing: MissingFks::default(),
            fks: ResolvedFks::default(),
            update_paths: BTreeSet::new(),
            create_paths: BTreeSet::new(),
            comic_ids: HashMap::new(),
            moved_comic_ids: BTreeSet::new(),
            written_comic_ids: BTreeSet::new(),
            cover_purge_ids: BTreeSet::new(),
            cover_regenerate_ids: BTreeSet::new(),
            custom_cover_regenerate_ids: BTreeSet::new(),
            custom_cover_purge_ids: BTreeSet::new(),
            failed_imports_changed: false,
            summary,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.summary.run_id
    }

    pub fn library_id(&self) -> i64 {
        self.library.id
    }

    /// Stop point between batches
    pub fn check_abort(&self) -> anyhow::Result<()> {
        if self.abort.is_cancelled() {
            return Err(Aborted.into());
        }
        Ok(())
    }
}
