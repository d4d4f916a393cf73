//! Filesystem stat snapshots
//!
//! Folders, comics, failed imports and custom covers keep a stat snapshot so
//! out-of-band changes can be detected by comparing against the filesystem.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Size and modification time of a path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
}

impl FileStat {
    /// Read the stat of a path. Errors when the path is gone.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let (mtime_secs, mtime_nanos) = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or((0, 0));

        Ok(Self {
            size: metadata.len(),
            mtime_secs,
            mtime_nanos,
        })
    }

    /// Stat for a path, or the zero stat if it can't be read
    pub fn from_path_lossy(path: &Path) -> Self {
        match Self::from_path(path) {
            Ok(stat) => stat,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Stat failed, using empty stat");
                Self::default()
            }
        }
    }

    /// JSON column value
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(value: &str) -> Option<Self> {
        serde_json::from_str(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stat_reads_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.cbz");
        std::fs::write(&path, b"12345").unwrap();

        let stat = FileStat::from_path(&path).unwrap();
        assert_eq!(stat.size, 5);
        assert!(stat.mtime_secs > 0);
        assert_eq!(FileStat::from_json(&stat.to_json()), Some(stat));
    }

    #[test]
    fn test_missing_path_is_lossy_default() {
        let stat = FileStat::from_path_lossy(Path::new("/definitely/not/here.cbz"));
        assert_eq!(stat, FileStat::default());
    }
}
