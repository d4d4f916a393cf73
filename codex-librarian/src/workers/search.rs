//! Full-text search index
//!
//! `comic_fts` holds one row per comic, keyed by rowid = comic id. A comic is
//! stale when `search_index_sync` has no row for it or remembers a different
//! `updated_at` than the comic has now. Updates run in batches and stop at a
//! batch boundary when aborted.

use crate::abort::AbortKind;
use crate::db::{self, push_in_list, settings};
use crate::status::{Status, StatusType};
use crate::tasks::SearchIndexTask;
use crate::LibrarianState;
use anyhow::Result;
use chrono::Utc;
use codex_common::events::{notices, Audience};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::notifier::NotifierTask;

/// Comics indexed per write
const INDEX_BATCH_SIZE: usize = 500;

/// Name lists folded into the `tags` column, `(junction, target table)`
const TAG_SOURCES: &[(&str, &str)] = &[
    ("comic_characters", "character"),
    ("comic_genres", "genre"),
    ("comic_locations", "location"),
    ("comic_tags", "tag"),
    ("comic_teams", "team"),
    ("comic_series_groups", "series_group"),
];

#[derive(Debug, sqlx::FromRow)]
struct IndexRow {
    id: i64,
    updated_at: String,
    name: String,
    publisher: String,
    imprint: String,
    series: String,
    volume: String,
    summary: String,
    tags: String,
}

fn tags_expression() -> String {
    let mut parts: Vec<String> = TAG_SOURCES
        .iter()
        .map(|(junction, table)| {
            format!(
                "(SELECT group_concat(t.name, ' ') FROM {junction} j JOIN {table} t ON t.id = j.target_id \
                 WHERE j.comic_id = c.id)"
            )
        })
        .collect();
    parts.push(
        "(SELECT group_concat(sa.name, ' ') FROM comic_story_arc_numbers j \
         JOIN story_arc_number n ON n.id = j.target_id JOIN story_arc sa ON sa.id = n.story_arc_id \
         WHERE j.comic_id = c.id)"
            .to_string(),
    );
    parts.push(
        "(SELECT group_concat(p.name, ' ') FROM comic_credits j \
         JOIN credit cr ON cr.id = j.target_id JOIN credit_person p ON p.id = cr.person_id \
         WHERE j.comic_id = c.id)"
            .to_string(),
    );
    let coalesced: Vec<String> = parts.into_iter().map(|p| format!("COALESCE({p}, '')")).collect();
    format!("TRIM({})", coalesced.join(" || ' ' || "))
}

/// Ids of comics whose index row is missing or out of date
pub async fn stale_comic_ids(db: &SqlitePool) -> codex_common::Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT c.id FROM comic c LEFT JOIN search_index_sync s ON s.comic_id = c.id \
         WHERE s.comic_id IS NULL OR s.comic_updated_at != CAST(c.updated_at AS TEXT) ORDER BY c.id",
    )
    .fetch_all(db)
    .await?;
    Ok(ids)
}

async fn load_rows(db: &SqlitePool, ids: &[i64]) -> codex_common::Result<Vec<IndexRow>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT c.id, CAST(c.updated_at AS TEXT) AS updated_at, c.name, \
         p.name AS publisher, i.name AS imprint, s.name AS series, v.name AS volume, \
         c.summary, {} AS tags \
         FROM comic c \
         JOIN publisher p ON p.id = c.publisher_id \
         JOIN imprint i ON i.id = c.imprint_id \
         JOIN series s ON s.id = c.series_id \
         JOIN volume v ON v.id = c.volume_id \
         WHERE c.id IN ",
        tags_expression()
    ));
    push_in_list(&mut qb, ids.iter().copied());
    let rows = qb.build_query_as().fetch_all(db).await?;
    Ok(rows)
}

/// Replace the index rows of one batch of comics
async fn write_batch(db: &SqlitePool, ids: &[i64], rows: &[IndexRow]) -> codex_common::Result<()> {
    let mut tx = db.begin().await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM comic_fts WHERE rowid IN ");
    push_in_list(&mut qb, ids.iter().copied());
    qb.build().execute(&mut *tx).await?;

    let now = db::now();
    for row in rows {
        sqlx::query(
            "INSERT INTO comic_fts (rowid, name, publisher, imprint, series, volume, summary, tags) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.id)
        .bind(&row.name)
        .bind(&row.publisher)
        .bind(&row.imprint)
        .bind(&row.series)
        .bind(&row.volume)
        .bind(&row.summary)
        .bind(&row.tags)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO search_index_sync (comic_id, comic_updated_at, indexed_at) VALUES (?, ?, ?) \
             ON CONFLICT(comic_id) DO UPDATE SET comic_updated_at = excluded.comic_updated_at, \
             indexed_at = excluded.indexed_at",
        )
        .bind(row.id)
        .bind(&row.updated_at)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Comic ids matching an FTS5 query, best first
pub async fn search_comics(db: &SqlitePool, query: &str, limit: i64) -> codex_common::Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT rowid FROM comic_fts WHERE comic_fts MATCH ? ORDER BY rank LIMIT ?",
    )
    .bind(query)
    .bind(limit)
    .fetch_all(db)
    .await?;
    Ok(ids)
}

pub struct SearchIndexer {
    state: LibrarianState,
}

impl SearchIndexer {
    pub fn new(state: LibrarianState) -> Self {
        Self { state }
    }

    fn db(&self) -> &SqlitePool {
        &self.state.db
    }

    pub async fn handle(&self, task: SearchIndexTask) -> Result<usize> {
        match task {
            SearchIndexTask::Update { rebuild } => self.update(rebuild).await,
            SearchIndexTask::Optimize => self.optimize().await.map(|()| 0),
            SearchIndexTask::Clear => self.clear().await.map(|()| 0),
            SearchIndexTask::RemoveStale => self.remove_stale().await,
        }
    }

    /// Bring the index up to date. Returns the number of comics indexed.
    pub async fn update(&self, rebuild: bool) -> Result<usize> {
        let abort = self.state.abort.begin(AbortKind::SearchIndex);
        if rebuild {
            self.clear().await?;
        }
        self.remove_stale().await?;

        let stale = stale_comic_ids(self.db()).await?;
        if stale.is_empty() {
            debug!("Search index up to date");
            return Ok(0);
        }

        let mut status = Status::new(StatusType::SearchIndexUpdate, Some(stale.len()));
        self.state.status.start(&mut status).await;

        let mut indexed = 0;
        let mut aborted = false;
        let result = async {
            for batch in stale.chunks(INDEX_BATCH_SIZE) {
                if abort.is_cancelled() {
                    aborted = true;
                    break;
                }
                let rows = load_rows(self.db(), batch).await?;
                {
                    let _lock = self.state.write_lock.lock().await;
                    db::retry_on_lock("index comics", self.state.config.max_lock_wait_ms, || {
                        write_batch(self.db(), batch, &rows)
                    })
                    .await?;
                }
                indexed += rows.len();
                status.increment(batch.len());
                self.state.status.update(&mut status, false).await;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;
        self.state.status.finish(&status).await;
        result?;

        if aborted {
            info!(indexed, "Search index update aborted");
            return Ok(indexed);
        }

        settings::set_setting(self.db(), settings::SEARCH_INDEX_LAST_UPDATE, Utc::now().to_rfc3339()).await?;
        self.state
            .notifier
            .notice(NotifierTask::new(notices::SEARCH_INDEX_UPDATED, Audience::All));
        info!(count = indexed, "Updated search index");
        Ok(indexed)
    }

    /// Drop index rows of comics that no longer exist
    pub async fn remove_stale(&self) -> Result<usize> {
        let mut status = Status::new(StatusType::SearchIndexRemoveStale, None);
        self.state.status.start(&mut status).await;
        let result = async {
            let _lock = self.state.write_lock.lock().await;
            let mut tx = self.db().begin().await?;
            let removed = sqlx::query("DELETE FROM comic_fts WHERE rowid NOT IN (SELECT id FROM comic)")
                .execute(&mut *tx)
                .await?
                .rows_affected();
            sqlx::query("DELETE FROM search_index_sync WHERE comic_id NOT IN (SELECT id FROM comic)")
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<u64, anyhow::Error>(removed)
        }
        .await;
        self.state.status.finish(&status).await;

        let removed = result? as usize;
        if removed > 0 {
            info!(count = removed, "Removed stale search index rows");
        }
        Ok(removed)
    }

    pub async fn optimize(&self) -> Result<()> {
        let mut status = Status::new(StatusType::SearchIndexOptimize, None);
        self.state.status.start(&mut status).await;
        let result = {
            let _lock = self.state.write_lock.lock().await;
            sqlx::query("INSERT INTO comic_fts (comic_fts) VALUES ('optimize')")
                .execute(self.db())
                .await
        };
        self.state.status.finish(&status).await;
        result?;
        info!("Optimized search index");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let mut status = Status::new(StatusType::SearchIndexClear, None);
        self.state.status.start(&mut status).await;
        let result = async {
            let _lock = self.state.write_lock.lock().await;
            let mut tx = self.db().begin().await?;
            sqlx::query("DELETE FROM comic_fts").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM search_index_sync").execute(&mut *tx).await?;
            tx.commit().await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        self.state.status.finish(&status).await;
        result?;
        info!("Cleared search index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_expression_covers_every_source() {
        let sql = tags_expression();
        for (junction, _) in TAG_SOURCES {
            assert!(sql.contains(junction));
        }
        assert!(sql.contains("comic_story_arc_numbers"));
        assert!(sql.contains("comic_credits"));
        assert!(sql.starts_with("TRIM("));
    }
}
