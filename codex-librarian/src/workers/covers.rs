//! Cover thumbnail cache
//!
//! Thumbnails live under the cache directory at a path derived from the
//! sha256 of the owning row's key, sharded two levels deep:
//! `<cache>/ab/cd/<rest>.webp`. Rendering is delegated to a
//! [`CoverGenerator`].

use crate::db;
use crate::status::{Status, StatusType};
use crate::tasks::CoverTask;
use crate::LibrarianState;
use anyhow::Result;
use codex_common::events::{notices, Audience};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::notifier::NotifierTask;

const THUMBNAIL_EXTENSION: &str = "webp";

/// Renders a thumbnail for a comic archive or cover image
pub trait CoverGenerator: Send + Sync {
    /// Write a thumbnail of `source` to `dest`. Returns `false` when the
    /// source has no usable cover.
    fn generate(&self, source: &Path, dest: &Path) -> std::io::Result<bool>;
}

/// Copies image sources as their own thumbnail; archives get none.
///
/// Used by the binary when no renderer is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyImageGenerator;

impl CoverGenerator for CopyImageGenerator {
    fn generate(&self, source: &Path, dest: &Path) -> std::io::Result<bool> {
        let is_image = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "webp" | "gif"))
            .unwrap_or(false);
        if !is_image {
            return Ok(false);
        }
        std::fs::copy(source, dest)?;
        Ok(true)
    }
}

/// Cache file for a comic (`custom == false`) or custom cover id
pub fn cover_cache_path(cache_dir: &Path, id: i64, custom: bool) -> PathBuf {
    let key = if custom {
        format!("custom:{id}")
    } else {
        format!("comic:{id}")
    };
    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    cache_dir
        .join(&hex[0..2])
        .join(&hex[2..4])
        .join(format!("{}.{}", &hex[4..], THUMBNAIL_EXTENSION))
}

pub struct CoverWorker {
    state: LibrarianState,
    generator: Arc<dyn CoverGenerator>,
}

impl CoverWorker {
    pub fn new(state: LibrarianState, generator: Arc<dyn CoverGenerator>) -> Self {
        Self { state, generator }
    }

    fn cache_dir(&self) -> &Path {
        &self.state.config.cover_cache_dir
    }

    pub async fn handle(&self, task: CoverTask) -> Result<usize> {
        let count = match task {
            CoverTask::Remove { ids, custom } => self.remove(&ids, custom).await,
            CoverTask::Create { ids, custom } => self.create(&ids, custom).await?,
            CoverTask::Regenerate { ids, custom } => {
                self.remove(&ids, custom).await;
                self.create(&ids, custom).await?
            }
            CoverTask::RemoveOrphans => self.remove_orphans().await?,
        };
        if count > 0 {
            self.state
                .notifier
                .notice(NotifierTask::new(notices::COVERS_CHANGED, Audience::All));
        }
        Ok(count)
    }

    /// Delete cached thumbnails. Missing files are not an error.
    pub async fn remove(&self, ids: &[i64], custom: bool) -> usize {
        let mut status = Status::new(StatusType::CoversPurge, Some(ids.len()));
        self.state.status.start(&mut status).await;

        let mut removed = 0;
        for id in ids {
            let path = cover_cache_path(self.cache_dir(), *id, custom);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove cover"),
            }
            status.increment(1);
        }
        self.state.status.finish(&status).await;

        info!(count = removed, custom, "Purged covers");
        removed
    }

    /// Generate thumbnails that are not cached yet
    pub async fn create(&self, ids: &[i64], custom: bool) -> Result<usize> {
        let sources = if custom {
            db::custom_covers::cover_paths(&self.state.db, ids).await?
        } else {
            db::comics::comic_paths(&self.state.db, ids).await?
        };
        let missing: Vec<(PathBuf, PathBuf)> = sources
            .into_iter()
            .map(|(id, source)| (PathBuf::from(source), cover_cache_path(self.cache_dir(), id, custom)))
            .filter(|(_, dest)| !dest.exists())
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let mut status = Status::new(StatusType::CoversCreate, Some(missing.len()));
        self.state.status.start(&mut status).await;

        let mut created = 0;
        for (source, dest) in missing {
            if self.state.shutdown.is_cancelled() {
                break;
            }
            let generator = self.generator.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                generator.generate(&source, &dest)
            })
            .await;
            match outcome {
                Ok(Ok(true)) => created += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => debug!(error = %e, "Cover generation failed"),
                Err(e) => warn!(error = %e, "Cover generation task died"),
            }
            status.increment(1);
            self.state.status.update(&mut status, false).await;
        }
        self.state.status.finish(&status).await;

        info!(count = created, custom, "Created covers");
        Ok(created)
    }

    /// Delete cache files that no comic or custom cover owns
    pub async fn remove_orphans(&self) -> Result<usize> {
        let comic_ids = db::comics::all_comic_ids(&self.state.db).await?;
        let custom_ids = db::custom_covers::all_cover_ids(&self.state.db).await?;
        let cache_dir = self.cache_dir().to_path_buf();

        let mut status = Status::new(StatusType::CoversCleanup, None);
        self.state.status.start(&mut status).await;

        let outcome = tokio::task::spawn_blocking(move || {
            let owned: HashSet<PathBuf> = comic_ids
                .iter()
                .map(|id| cover_cache_path(&cache_dir, *id, false))
                .chain(custom_ids.iter().map(|id| cover_cache_path(&cache_dir, *id, true)))
                .collect();
            let mut removed = 0;
            for entry in WalkDir::new(&cache_dir)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                if owned.contains(entry.path()) {
                    continue;
                }
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "Could not remove orphan cover"),
                }
            }
            removed
        })
        .await;
        self.state.status.finish(&status).await;

        let removed = outcome?;
        info!(count = removed, "Removed orphan covers");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_path_is_sharded_and_distinct() {
        let root = Path::new("/cache");
        let comic = cover_cache_path(root, 42, false);
        let custom = cover_cache_path(root, 42, true);

        assert_ne!(comic, custom);
        assert_eq!(comic, cover_cache_path(root, 42, false));
        let relative = comic.strip_prefix(root).unwrap();
        assert_eq!(relative.components().count(), 3);
        assert_eq!(comic.extension().and_then(|e| e.to_str()), Some("webp"));
    }

    #[test]
    fn test_copy_generator_skips_archives() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("cover.png");
        let archive = dir.path().join("issue.cbz");
        std::fs::write(&image, b"png").unwrap();
        std::fs::write(&archive, b"zip").unwrap();

        let dest = dir.path().join("thumb.webp");
        assert!(!CopyImageGenerator.generate(&archive, &dest).unwrap());
        assert!(!dest.exists());
        assert!(CopyImageGenerator.generate(&image, &dest).unwrap());
        assert_eq!(std::fs::read(&dest).unwrap(), b"png");
    }
}
