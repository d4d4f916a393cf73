//! Comic rows

use super::{push_in_list, rows_per_statement, FILTER_BATCH_SIZE};
use crate::models::ComicRecord;
use codex_common::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{BTreeSet, HashMap};

/// Group and folder ids resolved for one comic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComicForeignKeys {
    pub publisher_id: i64,
    pub imprint_id: i64,
    pub series_id: i64,
    pub volume_id: i64,
    pub parent_folder_id: Option<i64>,
}

/// A fully resolved comic row
#[derive(Debug, Clone)]
pub struct ComicRow<'a> {
    pub record: &'a ComicRecord,
    pub fks: ComicForeignKeys,
}

const COMIC_COLUMNS: &[&str] = &[
    "library_id",
    "path",
    "stat",
    "size",
    "name",
    "sort_name",
    "issue_number",
    "issue_suffix",
    "year",
    "month",
    "day",
    "summary",
    "notes",
    "page_count",
    "language",
    "age_rating",
    "critical_rating",
    "file_type",
    "publisher_id",
    "imprint_id",
    "series_id",
    "volume_id",
    "parent_folder_id",
    "created_at",
    "updated_at",
];

/// Ids of comics at the given paths
pub async fn comic_ids(db: &SqlitePool, library_id: i64, paths: &[String]) -> Result<HashMap<String, i64>> {
    let mut found = HashMap::new();
    for chunk in paths.chunks(FILTER_BATCH_SIZE - 1) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT path, id FROM comic WHERE library_id = ");
        qb.push_bind(library_id);
        qb.push(" AND path IN ");
        push_in_list(&mut qb, chunk.iter());
        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows);
    }
    Ok(found)
}

/// Every comic path in a library
pub async fn library_comic_paths(db: &SqlitePool, library_id: i64) -> Result<Vec<String>> {
    let paths = sqlx::query_scalar("SELECT path FROM comic WHERE library_id = ? ORDER BY path")
        .bind(library_id)
        .fetch_all(db)
        .await?;
    Ok(paths)
}

/// Insert comics, or overwrite the existing row at the same path when any
/// column differs. Returns `(path, id)` of every row actually written;
/// unchanged rows are left alone, updated_at included.
pub async fn upsert_comics(
    db: &SqlitePool,
    library_id: i64,
    rows: &[ComicRow<'_>],
) -> Result<Vec<(String, i64)>> {
    let now = super::now();
    let compared: Vec<&str> = COMIC_COLUMNS
        .iter()
        .copied()
        .filter(|c| !matches!(*c, "library_id" | "path" | "created_at" | "updated_at"))
        .collect();
    let mut update_set: Vec<String> = compared
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    update_set.push("updated_at = excluded.updated_at".to_string());
    let changed = compared
        .iter()
        .map(|c| format!("comic.{c} IS NOT excluded.{c}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    let mut written = Vec::new();
    for chunk in rows.chunks(rows_per_statement(COMIC_COLUMNS.len())) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO comic ({}) ", COMIC_COLUMNS.join(", ")));
        qb.push_values(chunk, |mut b, row| {
            let r = row.record;
            b.push_bind(library_id)
                .push_bind(&r.path)
                .push_bind(r.stat.to_json())
                .push_bind(r.stat.size as i64)
                .push_bind(&r.name)
                .push_bind(crate::models::sort_name(&r.name))
                .push_bind(r.issue_number)
                .push_bind(&r.issue_suffix)
                .push_bind(r.year)
                .push_bind(r.month)
                .push_bind(r.day)
                .push_bind(&r.summary)
                .push_bind(&r.notes)
                .push_bind(r.page_count)
                .push_bind(&r.language)
                .push_bind(&r.age_rating)
                .push_bind(r.critical_rating)
                .push_bind(&r.file_type)
                .push_bind(row.fks.publisher_id)
                .push_bind(row.fks.imprint_id)
                .push_bind(row.fks.series_id)
                .push_bind(row.fks.volume_id)
                .push_bind(row.fks.parent_folder_id)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(" ON CONFLICT(library_id, path) DO UPDATE SET ");
        qb.push(update_set.join(", "));
        qb.push(" WHERE ");
        qb.push(&changed);
        qb.push(" RETURNING path, id");
        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(db).await?;
        written.extend(rows);
    }
    Ok(written)
}

/// Move one comic to a new path. Returns its id, or `None` if no comic was
/// at `src`.
pub async fn move_comic(
    db: &SqlitePool,
    library_id: i64,
    src: &str,
    dest: &str,
    parent_folder_id: Option<i64>,
    stat: &str,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        "UPDATE comic SET path = ?, parent_folder_id = ?, stat = ?, updated_at = ? \
         WHERE library_id = ? AND path = ? RETURNING id",
    )
    .bind(dest)
    .bind(parent_folder_id)
    .bind(stat)
    .bind(super::now())
    .bind(library_id)
    .bind(src)
    .fetch_optional(db)
    .await?;
    Ok(id)
}

/// Delete comics by path, returning the deleted ids
pub async fn delete_comics(db: &SqlitePool, library_id: i64, paths: &[String]) -> Result<Vec<i64>> {
    let mut deleted = Vec::new();
    for chunk in paths.chunks(FILTER_BATCH_SIZE - 1) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM comic WHERE library_id = ");
        qb.push_bind(library_id);
        qb.push(" AND path IN ");
        push_in_list(&mut qb, chunk.iter());
        qb.push(" RETURNING id");
        let ids: Vec<i64> = qb.build_query_scalar().fetch_all(db).await?;
        deleted.extend(ids);
    }
    deleted.sort_unstable();
    Ok(deleted)
}

/// Series and volume ids referenced by the given comics
pub async fn group_ids_for_comics(
    db: &SqlitePool,
    comic_ids: &[i64],
) -> Result<(BTreeSet<i64>, BTreeSet<i64>)> {
    let mut series = BTreeSet::new();
    let mut volumes = BTreeSet::new();
    for chunk in comic_ids.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT series_id, volume_id FROM comic WHERE id IN ");
        push_in_list(&mut qb, chunk.iter().copied());
        let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(db).await?;
        for (s, v) in rows {
            series.insert(s);
            volumes.insert(v);
        }
    }
    Ok((series, volumes))
}

/// Comics with no parent folder link, `(id, path)`
pub async fn parentless_comics(db: &SqlitePool, library_id: i64) -> Result<Vec<(i64, String)>> {
    let rows = sqlx::query_as(
        "SELECT id, path FROM comic WHERE library_id = ? AND parent_folder_id IS NULL ORDER BY path",
    )
    .bind(library_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn set_comic_parent(db: &SqlitePool, comic_id: i64, parent_folder_id: i64) -> Result<()> {
    sqlx::query("UPDATE comic SET parent_folder_id = ?, updated_at = ? WHERE id = ?")
        .bind(parent_folder_id)
        .bind(super::now())
        .bind(comic_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Bump `updated_at` so the search index re-reads these comics
pub async fn touch_comics(db: &SqlitePool, comic_ids: &[i64]) -> Result<u64> {
    let now = super::now();
    let mut touched = 0;
    for chunk in comic_ids.chunks(FILTER_BATCH_SIZE - 1) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE comic SET updated_at = ");
        qb.push_bind(&now);
        qb.push(" WHERE id IN ");
        push_in_list(&mut qb, chunk.iter().copied());
        touched += qb.build().execute(db).await?.rows_affected();
    }
    Ok(touched)
}

/// Every comic id
pub async fn all_comic_ids(db: &SqlitePool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT id FROM comic ORDER BY id")
        .fetch_all(db)
        .await?;
    Ok(ids)
}

/// `(id, path)` for comic ids
pub async fn comic_paths(db: &SqlitePool, comic_ids: &[i64]) -> Result<Vec<(i64, String)>> {
    let mut found = Vec::new();
    for chunk in comic_ids.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id, path FROM comic WHERE id IN ");
        push_in_list(&mut qb, chunk.iter().copied());
        let rows: Vec<(i64, String)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows);
    }
    Ok(found)
}
