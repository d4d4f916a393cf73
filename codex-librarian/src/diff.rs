//! Filesystem change sets consumed by the importer
//!
//! A watcher or poller produces one [`Diff`] per detected batch of events.
//! Paths are absolute and stored as strings, matching the `path` columns.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Changes for one category of path (directories, comic files, cover images)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryDiff {
    /// Old path to new path
    pub moved: BTreeMap<String, String>,
    pub modified: BTreeSet<String>,
    pub created: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl CategoryDiff {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty()
            && self.modified.is_empty()
            && self.created.is_empty()
            && self.deleted.is_empty()
    }

    /// Total number of paths mentioned
    pub fn len(&self) -> usize {
        self.moved.len() + self.modified.len() + self.created.len() + self.deleted.len()
    }

    /// Make the four sets mutually exclusive.
    ///
    /// Deleted wins over everything. A move destination is not also created,
    /// and a created path is not also modified.
    pub fn normalize(&mut self) {
        let deleted = &self.deleted;
        self.moved
            .retain(|src, dest| !deleted.contains(src) && !deleted.contains(dest));
        self.modified.retain(|p| !deleted.contains(p));
        self.created.retain(|p| !deleted.contains(p));

        for (src, dest) in &self.moved {
            self.created.remove(src);
            self.created.remove(dest);
            self.modified.remove(src);
        }

        let created = &self.created;
        self.modified.retain(|p| !created.contains(p));
    }
}

/// All changes in one library since the last sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diff {
    pub dirs: CategoryDiff,
    pub files: CategoryDiff,
    pub covers: CategoryDiff,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty() && self.covers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dirs.len() + self.files.len() + self.covers.len()
    }

    pub fn normalize(&mut self) {
        self.dirs.normalize();
        self.files.normalize();
        self.covers.normalize();
    }

    /// Every path whose file content may still be changing
    pub fn settle_paths(&self) -> BTreeSet<String> {
        let mut paths: BTreeSet<String> = BTreeSet::new();
        for category in [&self.files, &self.covers] {
            paths.extend(category.modified.iter().cloned());
            paths.extend(category.created.iter().cloned());
            paths.extend(category.moved.values().cloned());
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_normalize_deleted_wins() {
        let mut diff = CategoryDiff {
            moved: [("/lib/a.cbz".to_string(), "/lib/b.cbz".to_string())].into(),
            modified: set(&["/lib/c.cbz", "/lib/d.cbz"]),
            created: set(&["/lib/d.cbz", "/lib/e.cbz"]),
            deleted: set(&["/lib/a.cbz", "/lib/c.cbz", "/lib/e.cbz"]),
        };
        diff.normalize();

        assert!(diff.moved.is_empty());
        assert!(diff.modified.is_empty());
        assert_eq!(diff.created, set(&["/lib/d.cbz"]));
        assert_eq!(diff.deleted.len(), 3);
    }

    #[test]
    fn test_normalize_move_destination_not_created() {
        let mut diff = CategoryDiff {
            moved: [("/lib/old.cbz".to_string(), "/lib/new.cbz".to_string())].into(),
            created: set(&["/lib/new.cbz", "/lib/other.cbz"]),
            ..Default::default()
        };
        diff.normalize();

        assert_eq!(diff.created, set(&["/lib/other.cbz"]));
        assert_eq!(diff.moved.len(), 1);
    }

    #[test]
    fn test_settle_paths_skip_deletes_and_dirs() {
        let diff = Diff {
            dirs: CategoryDiff {
                created: set(&["/lib/dir"]),
                ..Default::default()
            },
            files: CategoryDiff {
                created: set(&["/lib/dir/a.cbz"]),
                deleted: set(&["/lib/gone.cbz"]),
                ..Default::default()
            },
            covers: CategoryDiff::default(),
        };
        assert_eq!(diff.settle_paths(), set(&["/lib/dir/a.cbz"]));
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn test_diff_deserializes_with_missing_sections() {
        let diff: Diff =
            serde_json::from_str(r#"{"files": {"created": ["/lib/a.cbz"]}}"#).unwrap();
        assert_eq!(diff.files.created, set(&["/lib/a.cbz"]));
        assert!(diff.dirs.is_empty());
    }
}
