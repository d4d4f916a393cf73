//! Publisher → Imprint → Series → Volume rows
//!
//! Lookups are keyed by the full ancestor-name tuple and batched by
//! publisher name.

use super::{push_in_list, rows_per_statement, FILTER_BATCH_SIZE};
use crate::models::{sort_name, GroupTree};
use codex_common::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

pub type ImprintKey = (String, String);
pub type SeriesKey = (String, String, String);

/// Existing series row: id and declared volume count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountedRow {
    pub id: i64,
    pub count: Option<i64>,
}

pub async fn publisher_ids(db: &SqlitePool, names: &[String]) -> Result<HashMap<String, i64>> {
    let mut found = HashMap::new();
    for chunk in names.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT name, id FROM publisher WHERE name IN ");
        push_in_list(&mut qb, chunk.iter());
        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows);
    }
    Ok(found)
}

pub async fn imprint_ids(db: &SqlitePool, publishers: &[String]) -> Result<HashMap<ImprintKey, i64>> {
    let mut found = HashMap::new();
    for chunk in publishers.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT p.name, i.name, i.id FROM imprint i \
             JOIN publisher p ON p.id = i.publisher_id WHERE p.name IN ",
        );
        push_in_list(&mut qb, chunk.iter());
        let rows: Vec<(String, String, i64)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows.into_iter().map(|(p, i, id)| ((p, i), id)));
    }
    Ok(found)
}

pub async fn series_rows(db: &SqlitePool, publishers: &[String]) -> Result<HashMap<SeriesKey, CountedRow>> {
    let mut found = HashMap::new();
    for chunk in publishers.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT p.name, i.name, s.name, s.id, s.volume_count FROM series s \
             JOIN imprint i ON i.id = s.imprint_id \
             JOIN publisher p ON p.id = i.publisher_id WHERE p.name IN ",
        );
        push_in_list(&mut qb, chunk.iter());
        let rows: Vec<(String, String, String, i64, Option<i64>)> =
            qb.build_query_as().fetch_all(db).await?;
        found.extend(
            rows.into_iter()
                .map(|(p, i, s, id, count)| ((p, i, s), CountedRow { id, count })),
        );
    }
    Ok(found)
}

pub async fn volume_rows(db: &SqlitePool, publishers: &[String]) -> Result<HashMap<GroupTree, CountedRow>> {
    let mut found = HashMap::new();
    for chunk in publishers.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT p.name, i.name, s.name, v.name, v.id, v.issue_count FROM volume v \
             JOIN series s ON s.id = v.series_id \
             JOIN imprint i ON i.id = s.imprint_id \
             JOIN publisher p ON p.id = i.publisher_id WHERE p.name IN ",
        );
        push_in_list(&mut qb, chunk.iter());
        let rows: Vec<(String, String, String, String, i64, Option<i64>)> =
            qb.build_query_as().fetch_all(db).await?;
        found.extend(rows.into_iter().map(|(publisher, imprint, series, volume, id, count)| {
            (
                GroupTree {
                    publisher,
                    imprint,
                    series,
                    volume,
                },
                CountedRow { id, count },
            )
        }));
    }
    Ok(found)
}

pub async fn insert_publishers(db: &SqlitePool, names: &[String]) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in names.chunks(rows_per_statement(4)) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO publisher (name, sort_name, created_at, updated_at) ");
        qb.push_values(chunk, |mut b, name| {
            b.push_bind(name)
                .push_bind(sort_name(name))
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(" ON CONFLICT(name) DO UPDATE SET updated_at = excluded.updated_at");
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

/// `(publisher_id, name)` rows
pub async fn insert_imprints(db: &SqlitePool, rows: &[(i64, String)]) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(5)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO imprint (publisher_id, name, sort_name, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, (publisher_id, name)| {
            b.push_bind(*publisher_id)
                .push_bind(name)
                .push_bind(sort_name(name))
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(" ON CONFLICT(publisher_id, name) DO UPDATE SET updated_at = excluded.updated_at");
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

#[derive(Debug, Clone)]
pub struct NewSeries {
    pub publisher_id: i64,
    pub imprint_id: i64,
    pub name: String,
    pub volume_count: Option<i64>,
}

/// Counts on conflict are only ever raised
const RAISE_VOLUME_COUNT: &str = "volume_count = CASE \
    WHEN excluded.volume_count IS NULL THEN series.volume_count \
    WHEN series.volume_count IS NULL THEN excluded.volume_count \
    ELSE MAX(series.volume_count, excluded.volume_count) END";

const RAISE_ISSUE_COUNT: &str = "issue_count = CASE \
    WHEN excluded.issue_count IS NULL THEN volume.issue_count \
    WHEN volume.issue_count IS NULL THEN excluded.issue_count \
    ELSE MAX(volume.issue_count, excluded.issue_count) END";

pub async fn insert_series(db: &SqlitePool, rows: &[NewSeries]) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(7)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO series (publisher_id, imprint_id, name, sort_name, volume_count, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, s| {
            b.push_bind(s.publisher_id)
                .push_bind(s.imprint_id)
                .push_bind(&s.name)
                .push_bind(sort_name(&s.name))
                .push_bind(s.volume_count)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(" ON CONFLICT(imprint_id, name) DO UPDATE SET updated_at = excluded.updated_at, ");
        qb.push(RAISE_VOLUME_COUNT);
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

#[derive(Debug, Clone)]
pub struct NewVolume {
    pub publisher_id: i64,
    pub imprint_id: i64,
    pub series_id: i64,
    pub name: String,
    pub issue_count: Option<i64>,
}

pub async fn insert_volumes(db: &SqlitePool, rows: &[NewVolume]) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(7)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO volume (publisher_id, imprint_id, series_id, name, issue_count, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, v| {
            b.push_bind(v.publisher_id)
                .push_bind(v.imprint_id)
                .push_bind(v.series_id)
                .push_bind(&v.name)
                .push_bind(v.issue_count)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(" ON CONFLICT(series_id, name) DO UPDATE SET updated_at = excluded.updated_at, ");
        qb.push(RAISE_ISSUE_COUNT);
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

/// Raise declared counts on existing rows, `(id, count)`. Never lowers.
pub async fn raise_series_volume_counts(db: &SqlitePool, rows: &[(i64, i64)]) -> Result<u64> {
    raise_counts(db, "series", "volume_count", rows).await
}

pub async fn raise_volume_issue_counts(db: &SqlitePool, rows: &[(i64, i64)]) -> Result<u64> {
    raise_counts(db, "volume", "issue_count", rows).await
}

async fn raise_counts(db: &SqlitePool, table: &str, column: &str, rows: &[(i64, i64)]) -> Result<u64> {
    let sql = format!(
        "UPDATE {table} SET {column} = ?, updated_at = ? \
         WHERE id = ? AND ({column} IS NULL OR {column} < ?)"
    );
    let now = super::now();
    let mut updated = 0;
    let mut tx = db.begin().await?;
    for (id, count) in rows {
        updated += sqlx::query(&sql)
            .bind(count)
            .bind(&now)
            .bind(id)
            .bind(count)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(updated)
}

/// Raise series volume counts and volume issue counts to at least the number
/// of children that actually exist
pub async fn raise_counts_to_children(
    db: &SqlitePool,
    series_ids: &[i64],
    volume_ids: &[i64],
) -> Result<u64> {
    let now = super::now();
    let mut updated = 0;
    for chunk in series_ids.chunks(FILTER_BATCH_SIZE - 1) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "UPDATE series SET volume_count = \
             (SELECT COUNT(*) FROM volume v WHERE v.series_id = series.id), updated_at = ",
        );
        qb.push_bind(&now);
        qb.push(
            " WHERE (volume_count IS NULL OR volume_count < \
             (SELECT COUNT(*) FROM volume v WHERE v.series_id = series.id)) AND id IN ",
        );
        push_in_list(&mut qb, chunk.iter().copied());
        updated += qb.build().execute(db).await?.rows_affected();
    }
    for chunk in volume_ids.chunks(FILTER_BATCH_SIZE - 1) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "UPDATE volume SET issue_count = \
             (SELECT COUNT(*) FROM comic c WHERE c.volume_id = volume.id), updated_at = ",
        );
        qb.push_bind(&now);
        qb.push(
            " WHERE (issue_count IS NULL OR issue_count < \
             (SELECT COUNT(*) FROM comic c WHERE c.volume_id = volume.id)) AND id IN ",
        );
        push_in_list(&mut qb, chunk.iter().copied());
        updated += qb.build().execute(db).await?.rows_affected();
    }
    Ok(updated)
}

/// Set every count to the number of existing children. May lower counts.
pub async fn recompute_all_counts(db: &SqlitePool) -> Result<u64> {
    let series = sqlx::query(
        "UPDATE series SET volume_count = (SELECT COUNT(*) FROM volume v WHERE v.series_id = series.id) \
         WHERE volume_count IS NOT (SELECT COUNT(*) FROM volume v WHERE v.series_id = series.id)",
    )
    .execute(db)
    .await?
    .rows_affected();
    let volumes = sqlx::query(
        "UPDATE volume SET issue_count = (SELECT COUNT(*) FROM comic c WHERE c.volume_id = volume.id) \
         WHERE issue_count IS NOT (SELECT COUNT(*) FROM comic c WHERE c.volume_id = volume.id)",
    )
    .execute(db)
    .await?
    .rows_affected();
    Ok(series + volumes)
}

/// Delete groups nothing references, leaves first. Returns rows deleted.
pub async fn delete_orphan_groups(db: &SqlitePool) -> Result<u64> {
    let statements = [
        "DELETE FROM volume WHERE id NOT IN (SELECT volume_id FROM comic)",
        "DELETE FROM series WHERE id NOT IN (SELECT series_id FROM volume)",
        "DELETE FROM imprint WHERE id NOT IN (SELECT imprint_id FROM series)",
        "DELETE FROM publisher WHERE id NOT IN (SELECT publisher_id FROM imprint)",
    ];
    let mut deleted = 0;
    for sql in statements {
        deleted += sqlx::query(sql).execute(db).await?.rows_affected();
    }
    Ok(deleted)
}
