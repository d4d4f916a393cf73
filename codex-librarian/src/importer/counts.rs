//! Series and volume count propagation
//!
//! Declared counts only ever go up during an import: a series claims at
//! least as many volumes as it has, a volume at least as many issues.
//! Lowering happens in the janitor's full recompute.

use super::{ImportContext, Importer};
use crate::db;
use crate::status::{Status, StatusType};
use anyhow::Result;
use tracing::info;

impl Importer {
    pub(super) async fn propagate_group_counts(&self, ctx: &mut ImportContext) -> Result<()> {
        if ctx.written_comic_ids.is_empty() {
            return Ok(());
        }
        let comic_ids: Vec<i64> = ctx.written_comic_ids.iter().copied().collect();
        let (series_ids, volume_ids) = db::comics::group_ids_for_comics(self.db(), &comic_ids).await?;

        let mut status = Status::new(StatusType::GroupCounts, Some(series_ids.len() + volume_ids.len()));
        self.state.status.start(&mut status).await;

        let raised = {
            let _lock = self.state.write_lock.lock().await;
            let series: Vec<i64> = series_ids.iter().copied().collect();
            let volumes: Vec<i64> = volume_ids.iter().copied().collect();
            self.bulk_write("raise group counts", &[], || {
                db::groups::raise_counts_to_children(self.db(), &series, &volumes)
            })
            .await
            .unwrap_or(0)
        };
        status.increment(series_ids.len() + volume_ids.len());
        self.state.status.finish(&status).await;

        info!(library_id = ctx.library_id(), raised, "Updated group counts");
        Ok(())
    }
}
