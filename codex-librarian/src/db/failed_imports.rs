//! Failed import rows

use super::{push_in_list, rows_per_statement, FILTER_BATCH_SIZE};
use codex_common::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct NewFailedImport {
    pub path: String,
    pub name: String,
    pub parent_folder_id: Option<i64>,
    pub stat: String,
    pub reason: String,
}

/// Recorded failure paths of a library
pub async fn failed_paths(db: &SqlitePool, library_id: i64) -> Result<HashSet<String>> {
    let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM failed_import WHERE library_id = ?")
        .bind(library_id)
        .fetch_all(db)
        .await?;
    Ok(paths.into_iter().collect())
}

/// Create failure rows or refresh reason and stat of existing ones
pub async fn upsert_failed_imports(db: &SqlitePool, library_id: i64, rows: &[NewFailedImport]) -> Result<u64> {
    let now = super::now();
    let mut written = 0;
    for chunk in rows.chunks(rows_per_statement(8)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO failed_import (library_id, parent_folder_id, path, name, stat, reason, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, f| {
            b.push_bind(library_id)
                .push_bind(f.parent_folder_id)
                .push_bind(&f.path)
                .push_bind(&f.name)
                .push_bind(&f.stat)
                .push_bind(&f.reason)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(
            " ON CONFLICT(library_id, path) DO UPDATE SET \
             parent_folder_id = excluded.parent_folder_id, stat = excluded.stat, \
             reason = excluded.reason, updated_at = excluded.updated_at \
             WHERE failed_import.reason IS NOT excluded.reason \
             OR failed_import.stat IS NOT excluded.stat",
        );
        written += qb.build().execute(db).await?.rows_affected();
    }
    Ok(written)
}

pub async fn delete_failed_imports(db: &SqlitePool, library_id: i64, paths: &[String]) -> Result<u64> {
    let mut deleted = 0;
    for chunk in paths.chunks(FILTER_BATCH_SIZE - 1) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM failed_import WHERE library_id = ");
        qb.push_bind(library_id);
        qb.push(" AND path IN ");
        push_in_list(&mut qb, chunk.iter());
        deleted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(deleted)
}

/// Remove failure rows whose path now has a comic. `None` sweeps every
/// library.
pub async fn delete_failed_with_comics(db: &SqlitePool, library_id: Option<i64>) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM failed_import WHERE (?1 IS NULL OR library_id = ?1) AND EXISTS \
         (SELECT 1 FROM comic c WHERE c.library_id = failed_import.library_id \
          AND c.path = failed_import.path)",
    )
    .bind(library_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Every failure row, `(library_id, path)`
pub async fn all_failed_imports(db: &SqlitePool) -> Result<Vec<(i64, String)>> {
    let rows = sqlx::query_as("SELECT library_id, path FROM failed_import ORDER BY library_id, path")
        .fetch_all(db)
        .await?;
    Ok(rows)
}
