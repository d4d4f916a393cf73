//! Comic junction tables

use super::{push_in_list, rows_per_statement, FILTER_BATCH_SIZE};
use crate::models::LinkField;
use codex_common::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{BTreeSet, HashMap};

/// Current link targets per comic
pub async fn existing_links(
    db: &SqlitePool,
    field: LinkField,
    comic_ids: &[i64],
) -> Result<HashMap<i64, BTreeSet<i64>>> {
    let mut links: HashMap<i64, BTreeSet<i64>> = HashMap::new();
    for chunk in comic_ids.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT comic_id, target_id FROM {} WHERE comic_id IN ",
            field.junction_table()
        ));
        push_in_list(&mut qb, chunk.iter().copied());
        let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(db).await?;
        for (comic_id, target_id) in rows {
            links.entry(comic_id).or_default().insert(target_id);
        }
    }
    Ok(links)
}

/// Remove stale links, `(comic_id, target_ids)`
pub async fn delete_links(db: &SqlitePool, field: LinkField, stale: &[(i64, Vec<i64>)]) -> Result<u64> {
    let mut deleted = 0;
    let mut tx = db.begin().await?;
    for (comic_id, targets) in stale {
        for chunk in targets.chunks(FILTER_BATCH_SIZE - 1) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "DELETE FROM {} WHERE comic_id = ",
                field.junction_table()
            ));
            qb.push_bind(*comic_id);
            qb.push(" AND target_id IN ");
            push_in_list(&mut qb, chunk.iter().copied());
            deleted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
    }
    tx.commit().await?;
    Ok(deleted)
}

/// Insert links, ignoring pairs that already exist
pub async fn insert_links(db: &SqlitePool, field: LinkField, pairs: &[(i64, i64)]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in pairs.chunks(rows_per_statement(2)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO {} (comic_id, target_id) ",
            field.junction_table()
        ));
        qb.push_values(chunk, |mut b, (comic_id, target_id)| {
            b.push_bind(*comic_id).push_bind(*target_id);
        });
        qb.push(" ON CONFLICT(comic_id, target_id) DO NOTHING");
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}
