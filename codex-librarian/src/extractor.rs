//! Comic metadata extraction adapter
//!
//! Archive reading is an external collaborator: anything implementing
//! [`MetadataExtractor`] can be injected into the importer. Extractors must not
//! touch the database; they may read the filesystem.
//!
//! [`FilenameExtractor`] is the fallback used by the binary when no archive
//! reader is configured. It derives series, volume, issue and year from the
//! file name alone.

use crate::error::ExtractionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Comic archive extensions the importer treats as comics
pub const COMIC_EXTENSIONS: &[&str] = &["cbz", "cbr", "cb7", "cbt", "pdf"];

/// Nested publication date
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDate {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub day: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCredit {
    pub person: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedIdentifier {
    pub source: Option<String>,
    pub id_type: String,
    pub key: String,
    pub url: Option<String>,
}

/// Raw metadata for one comic, as returned by an extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    /// Issue as printed, e.g. "12", "12.5", "1AU"
    pub issue: Option<String>,
    pub date: Option<ExtractedDate>,
    pub summary: Option<String>,
    pub notes: Option<String>,
    pub page_count: Option<i64>,
    pub language: Option<String>,
    pub age_rating: Option<String>,
    pub critical_rating: Option<f64>,
    pub file_type: Option<String>,

    pub publisher: Option<String>,
    pub imprint: Option<String>,
    pub series: Option<String>,
    pub volume: Option<String>,
    pub series_volume_count: Option<i64>,
    pub volume_issue_count: Option<i64>,

    pub characters: Vec<String>,
    pub genres: Vec<String>,
    pub locations: Vec<String>,
    pub tags: Vec<String>,
    pub teams: Vec<String>,
    pub series_groups: Vec<String>,
    /// Story arc name to position within the arc
    pub story_arcs: BTreeMap<String, Option<i64>>,
    pub credits: Vec<ExtractedCredit>,
    pub identifiers: Vec<ExtractedIdentifier>,
}

/// Reads metadata from a comic archive
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata, ExtractionError>;
}

impl<F> MetadataExtractor for F
where
    F: Fn(&Path) -> Result<ExtractedMetadata, ExtractionError> + Send + Sync,
{
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata, ExtractionError> {
        self(path)
    }
}

/// True if the path has a comic archive extension
pub fn is_comic_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| COMIC_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Metadata from the file name only
///
/// `Series Name v2 #012 (2019).cbz` yields series "Series Name", volume "v2",
/// issue "012" and year 2019. Without an issue token the whole stem becomes
/// the series and the title.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameExtractor;

impl MetadataExtractor for FilenameExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata, ExtractionError> {
        if !is_comic_path(path) {
            return Err(ExtractionError::Unsupported(path.to_path_buf()));
        }
        std::fs::metadata(path)?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ExtractionError::InvalidMetadata("file name is not UTF-8".into()))?;
        let file_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        Ok(parse_file_name(stem, file_type))
    }
}

fn parse_file_name(stem: &str, file_type: Option<String>) -> ExtractedMetadata {
    let mut year = None;
    let mut words = Vec::new();
    for raw in stem.split_whitespace() {
        let trimmed = raw.trim_matches(|c| c == '(' || c == ')');
        if raw.starts_with('(') && trimmed.len() == 4 {
            if let Ok(y) = trimmed.parse::<i64>() {
                year = Some(y);
                continue;
            }
        }
        words.push(raw);
    }

    let mut volume = None;
    let mut issue = None;
    let mut series_words = Vec::new();
    for (i, word) in words.iter().enumerate() {
        let is_last = i + 1 == words.len();
        if is_volume_token(word) {
            volume = Some(word.to_string());
        } else if is_last && is_issue_token(word) {
            issue = Some(word.trim_start_matches('#').to_string());
        } else {
            series_words.push(*word);
        }
    }

    let series = series_words.join(" ");
    let title = if issue.is_none() && !series.is_empty() {
        Some(series.clone())
    } else {
        None
    };

    ExtractedMetadata {
        title,
        issue,
        date: year.map(|year| ExtractedDate {
            year: Some(year),
            ..Default::default()
        }),
        series: (!series.is_empty()).then_some(series),
        volume,
        file_type,
        ..Default::default()
    }
}

fn is_volume_token(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    lower
        .strip_prefix('v')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_issue_token(word: &str) -> bool {
    let word = word.trim_start_matches('#');
    word.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_file_name() {
        let meta = parse_file_name("Saga v2 #012 (2019)", Some("cbz".into()));
        assert_eq!(meta.series.as_deref(), Some("Saga"));
        assert_eq!(meta.volume.as_deref(), Some("v2"));
        assert_eq!(meta.issue.as_deref(), Some("012"));
        assert_eq!(meta.date.and_then(|d| d.year), Some(2019));
        assert!(meta.title.is_none());
    }

    #[test]
    fn test_parse_without_issue_uses_title() {
        let meta = parse_file_name("The Long Halloween", None);
        assert_eq!(meta.series.as_deref(), Some("The Long Halloween"));
        assert_eq!(meta.title.as_deref(), Some("The Long Halloween"));
        assert!(meta.issue.is_none());
    }

    #[test]
    fn test_unsupported_extension_fails() {
        let err = FilenameExtractor.extract(Path::new("/lib/readme.txt")).unwrap_err();
        assert!(matches!(err, ExtractionError::Unsupported(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = FilenameExtractor.extract(Path::new("/nope/issue 1.cbz")).unwrap_err();
        assert!(matches!(err, ExtractionError::Io(_)));
    }

    #[test]
    fn test_extract_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Hellboy 3.CBR");
        std::fs::write(&path, b"x").unwrap();

        let meta = FilenameExtractor.extract(&path).unwrap();
        assert_eq!(meta.series.as_deref(), Some("Hellboy"));
        assert_eq!(meta.issue.as_deref(), Some("3"));
        assert_eq!(meta.file_type.as_deref(), Some("cbr"));
    }

    #[test]
    fn test_closure_extractor() {
        let extractor = |_: &Path| -> Result<ExtractedMetadata, ExtractionError> {
            Ok(ExtractedMetadata {
                publisher: Some("Pub".into()),
                ..Default::default()
            })
        };
        let meta = extractor.extract(Path::new("/x.cbz")).unwrap();
        assert_eq!(meta.publisher.as_deref(), Some("Pub"));
    }
}
