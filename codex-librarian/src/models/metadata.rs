//! Aggregated comic metadata and foreign-key candidate keys

use crate::models::stat::FileStat;
use std::collections::{BTreeMap, BTreeSet};

/// Ancestor-name tuple locating a volume in the group hierarchy.
///
/// Missing names are stored as the empty string so that every comic has a
/// complete tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupTree {
    pub publisher: String,
    pub imprint: String,
    pub series: String,
    pub volume: String,
}

impl GroupTree {
    pub fn imprint_key(&self) -> (String, String) {
        (self.publisher.clone(), self.imprint.clone())
    }

    pub fn series_key(&self) -> (String, String, String) {
        (self.publisher.clone(), self.imprint.clone(), self.series.clone())
    }
}

/// Declared aggregate counts for a group tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupCounts {
    pub series_volume_count: Option<i64>,
    pub volume_issue_count: Option<i64>,
}

impl GroupCounts {
    /// Keep the larger declared value of each count
    pub fn merge(&mut self, other: GroupCounts) {
        self.series_volume_count = max_opt(self.series_volume_count, other.series_volume_count);
        self.volume_issue_count = max_opt(self.volume_issue_count, other.volume_issue_count);
    }
}

fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Tables that are unique by name alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NamedKind {
    Character,
    Genre,
    Location,
    Tag,
    Team,
    SeriesGroup,
    StoryArc,
    CreditPerson,
    CreditRole,
    IdentifierSource,
}

impl NamedKind {
    pub const ALL: [NamedKind; 10] = [
        NamedKind::Character,
        NamedKind::Genre,
        NamedKind::Location,
        NamedKind::Tag,
        NamedKind::Team,
        NamedKind::SeriesGroup,
        NamedKind::StoryArc,
        NamedKind::CreditPerson,
        NamedKind::CreditRole,
        NamedKind::IdentifierSource,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            NamedKind::Character => "character",
            NamedKind::Genre => "genre",
            NamedKind::Location => "location",
            NamedKind::Tag => "tag",
            NamedKind::Team => "team",
            NamedKind::SeriesGroup => "series_group",
            NamedKind::StoryArc => "story_arc",
            NamedKind::CreditPerson => "credit_person",
            NamedKind::CreditRole => "credit_role",
            NamedKind::IdentifierSource => "identifier_source",
        }
    }
}

/// Comic many-to-many fields, one junction table each
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkField {
    Characters,
    Genres,
    Locations,
    Tags,
    Teams,
    SeriesGroups,
    StoryArcNumbers,
    Credits,
    Identifiers,
    Folders,
}

impl LinkField {
    pub const ALL: [LinkField; 10] = [
        LinkField::Characters,
        LinkField::Genres,
        LinkField::Locations,
        LinkField::Tags,
        LinkField::Teams,
        LinkField::SeriesGroups,
        LinkField::StoryArcNumbers,
        LinkField::Credits,
        LinkField::Identifiers,
        LinkField::Folders,
    ];

    pub fn junction_table(&self) -> &'static str {
        match self {
            LinkField::Characters => "comic_characters",
            LinkField::Genres => "comic_genres",
            LinkField::Locations => "comic_locations",
            LinkField::Tags => "comic_tags",
            LinkField::Teams => "comic_teams",
            LinkField::SeriesGroups => "comic_series_groups",
            LinkField::StoryArcNumbers => "comic_story_arc_numbers",
            LinkField::Credits => "comic_credits",
            LinkField::Identifiers => "comic_identifiers",
            LinkField::Folders => "comic_folders",
        }
    }

    /// Named table a simple link field points into
    pub fn named_kind(&self) -> Option<NamedKind> {
        match self {
            LinkField::Characters => Some(NamedKind::Character),
            LinkField::Genres => Some(NamedKind::Genre),
            LinkField::Locations => Some(NamedKind::Location),
            LinkField::Tags => Some(NamedKind::Tag),
            LinkField::Teams => Some(NamedKind::Team),
            LinkField::SeriesGroups => Some(NamedKind::SeriesGroup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CreditKey {
    pub person: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoryArcKey {
    pub arc: String,
    pub number: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentifierKey {
    pub source: Option<String>,
    pub id_type: String,
    pub key: String,
}

/// Flat comic row values before foreign keys are resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComicRecord {
    pub path: String,
    pub stat: FileStat,
    pub name: String,
    pub issue_number: Option<f64>,
    pub issue_suffix: String,
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub day: Option<i64>,
    pub summary: String,
    pub notes: String,
    pub page_count: i64,
    pub language: Option<String>,
    pub age_rating: Option<String>,
    pub critical_rating: Option<f64>,
    pub file_type: String,
    pub group: GroupTree,
    /// Containing directory, `None` when directly in the library root
    pub parent_folder: Option<String>,
}

/// Desired many-to-many targets for one comic, by key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComicLinks {
    pub named: BTreeMap<LinkField, BTreeSet<String>>,
    pub story_arc_numbers: BTreeSet<StoryArcKey>,
    pub credits: BTreeSet<CreditKey>,
    pub identifiers: BTreeSet<IdentifierKey>,
    /// Every ancestor folder path inside the library
    pub folders: BTreeSet<String>,
}

/// Rows that must exist before comics can reference them
#[derive(Debug, Clone, Default)]
pub struct FkCandidates {
    pub groups: BTreeMap<GroupTree, GroupCounts>,
    pub folders: BTreeSet<String>,
    pub named: BTreeMap<NamedKind, BTreeSet<String>>,
    pub credits: BTreeSet<CreditKey>,
    pub story_arc_numbers: BTreeSet<StoryArcKey>,
    /// Identifier key to its url
    pub identifiers: BTreeMap<IdentifierKey, Option<String>>,
}

impl FkCandidates {
    pub fn add_named(&mut self, kind: NamedKind, name: &str) {
        self.named.entry(kind).or_default().insert(name.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
            && self.folders.is_empty()
            && self.named.values().all(|v| v.is_empty())
            && self.credits.is_empty()
            && self.story_arc_numbers.is_empty()
            && self.identifiers.is_empty()
    }

    /// Number of candidate rows across every bucket
    pub fn len(&self) -> usize {
        self.groups.len()
            + self.folders.len()
            + self.named.values().map(|v| v.len()).sum::<usize>()
            + self.credits.len()
            + self.story_arc_numbers.len()
            + self.identifiers.len()
    }
}

const SORT_ARTICLES: &[&str] = &["the ", "a ", "an "];

/// Lower-cased name without a leading English article
pub fn sort_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    for article in SORT_ARTICLES {
        if let Some(rest) = lower.strip_prefix(article) {
            if !rest.trim().is_empty() {
                return rest.trim_start().to_string();
            }
        }
    }
    lower
}

/// Split a printed issue into its number and suffix.
///
/// `"12.5b"` becomes `(Some(12.5), "b")`, `"AU"` becomes `(None, "AU")`.
pub fn split_issue(issue: &str) -> (Option<f64>, String) {
    let issue = issue.trim().trim_start_matches('#');
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in issue.char_indices() {
        if c.is_ascii_digit() || (c == '-' && i == 0) {
            end = i + c.len_utf8();
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            end = i + 1;
        } else {
            break;
        }
    }

    let numeric = issue[..end].trim_end_matches('.');
    let number = numeric.parse::<f64>().ok();
    let suffix_start = if number.is_some() { numeric.len() } else { 0 };
    let suffix = issue[suffix_start..].trim_start_matches('.').trim().to_string();
    (number, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_name_strips_article() {
        assert_eq!(sort_name("The Walking Dead"), "walking dead");
        assert_eq!(sort_name("An"), "an");
        assert_eq!(sort_name("Saga"), "saga");
    }

    #[test]
    fn test_split_issue() {
        assert_eq!(split_issue("12"), (Some(12.0), String::new()));
        assert_eq!(split_issue("#001"), (Some(1.0), String::new()));
        assert_eq!(split_issue("12.5b"), (Some(12.5), "b".to_string()));
        assert_eq!(split_issue("1AU"), (Some(1.0), "AU".to_string()));
        assert_eq!(split_issue("AU"), (None, "AU".to_string()));
        assert_eq!(split_issue("-1"), (Some(-1.0), String::new()));
        assert_eq!(split_issue("3."), (Some(3.0), String::new()));
    }

    #[test]
    fn test_group_counts_merge_keeps_max() {
        let mut counts = GroupCounts {
            series_volume_count: Some(2),
            volume_issue_count: None,
        };
        counts.merge(GroupCounts {
            series_volume_count: Some(1),
            volume_issue_count: Some(12),
        });
        assert_eq!(counts.series_volume_count, Some(2));
        assert_eq!(counts.volume_issue_count, Some(12));
    }
}
