//! Reattach orphaned folders and comics
//!
//! A folder or comic below the library root must have a parent folder. An
//! interrupted import can leave one without; this recreates the missing
//! ancestors and relinks.

use super::Importer;
use crate::abort::AbortKind;
use crate::db;
use crate::models::Library;
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};

impl Importer {
    /// Adopt orphans in every comic library. Returns the number relinked.
    pub async fn adopt_orphan_folders(&self) -> Result<usize> {
        let libraries = db::libraries::list_libraries(self.db()).await?;
        let abort = self.state.abort.begin(AbortKind::Import);

        let mut status = Status::new(StatusType::AdoptFolders, Some(libraries.len()));
        self.state.status.start(&mut status).await;

        let mut adopted = 0;
        let mut result = Ok(());
        for library in libraries.iter().filter(|l| !l.covers_only) {
            if abort.is_cancelled() {
                debug!("Orphan adoption aborted");
                break;
            }
            match self.adopt_in_library(library).await {
                Ok(n) => adopted += n,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
            status.increment(1);
            self.state.status.update(&mut status, false).await;
        }
        self.state.status.finish(&status).await;
        result?;

        info!(adopted, "Adopted orphan folders");
        Ok(adopted)
    }

    async fn adopt_in_library(&self, library: &Library) -> Result<usize> {
        let folders = db::folders::parentless_folders(self.db(), library.id).await?;
        let comics = db::comics::parentless_comics(self.db(), library.id).await?;

        let orphan_folders: Vec<(i64, String)> = folders
            .into_iter()
            .filter_map(|(id, path)| library.parent_folder(&path).map(|parent| (id, parent)))
            .collect();
        let orphan_comics: Vec<(i64, String)> = comics
            .into_iter()
            .filter_map(|(id, path)| library.parent_folder(&path).map(|parent| (id, parent)))
            .collect();
        if orphan_folders.is_empty() && orphan_comics.is_empty() {
            return Ok(0);
        }

        let parents: BTreeSet<String> = orphan_folders
            .iter()
            .chain(orphan_comics.iter())
            .map(|(_, parent)| parent.clone())
            .collect();

        let _lock = self.state.write_lock.lock().await;
        let (parent_ids, created) = self.ensure_folders(library, &parents).await?;

        let mut adopted = 0;
        for (folder_id, parent) in &orphan_folders {
            let Some(parent_id) = parent_ids.get(parent).copied() else { continue };
            let sample = [parent.clone()];
            if self
                .bulk_write("adopt folder", &sample, || {
                    db::folders::set_folder_parent(self.db(), *folder_id, parent_id)
                })
                .await
                .is_some()
            {
                adopted += 1;
            }
        }
        for (comic_id, parent) in &orphan_comics {
            let Some(parent_id) = parent_ids.get(parent).copied() else { continue };
            let sample = [parent.clone()];
            if self
                .bulk_write("adopt comic", &sample, || {
                    db::comics::set_comic_parent(self.db(), *comic_id, parent_id)
                })
                .await
                .is_some()
            {
                adopted += 1;
            }
        }

        info!(library_id = library.id, adopted, folders_created = created, "Adopted orphans");
        Ok(adopted)
    }
}
