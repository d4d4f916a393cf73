//! Named dimension rows (tags, genres, people...) and the compound ones built
//! from them (credits, story arc numbers, identifiers)

use super::{push_in_list, rows_per_statement, FILTER_BATCH_SIZE};
use crate::models::{LinkField, NamedKind};
use codex_common::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

pub async fn named_ids(db: &SqlitePool, kind: NamedKind, names: &[String]) -> Result<HashMap<String, i64>> {
    let mut found = HashMap::new();
    for chunk in names.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT name, id FROM {} WHERE name IN ", kind.table()));
        push_in_list(&mut qb, chunk.iter());
        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows);
    }
    Ok(found)
}

pub async fn insert_named(db: &SqlitePool, kind: NamedKind, names: &[String]) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in names.chunks(rows_per_statement(3)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO {} (name, created_at, updated_at) ",
            kind.table()
        ));
        qb.push_values(chunk, |mut b, name| {
            b.push_bind(name).push_bind(&now).push_bind(&now);
        });
        qb.push(" ON CONFLICT(name) DO NOTHING");
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

/// Credit ids keyed by `(person_id, role_id)`
pub async fn credit_ids(db: &SqlitePool, person_ids: &[i64]) -> Result<HashMap<(i64, Option<i64>), i64>> {
    let mut found = HashMap::new();
    for chunk in person_ids.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT person_id, role_id, id FROM credit WHERE person_id IN ");
        push_in_list(&mut qb, chunk.iter().copied());
        let rows: Vec<(i64, Option<i64>, i64)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows.into_iter().map(|(p, r, id)| ((p, r), id)));
    }
    Ok(found)
}

pub async fn insert_credits(db: &SqlitePool, rows: &[(i64, Option<i64>)]) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(4)) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO credit (person_id, role_id, created_at, updated_at) ");
        qb.push_values(chunk, |mut b, (person_id, role_id)| {
            b.push_bind(*person_id)
                .push_bind(*role_id)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

/// Story arc number ids keyed by `(story_arc_id, number)`
pub async fn story_arc_number_ids(
    db: &SqlitePool,
    story_arc_ids: &[i64],
) -> Result<HashMap<(i64, Option<i64>), i64>> {
    let mut found = HashMap::new();
    for chunk in story_arc_ids.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT story_arc_id, number, id FROM story_arc_number WHERE story_arc_id IN ",
        );
        push_in_list(&mut qb, chunk.iter().copied());
        let rows: Vec<(i64, Option<i64>, i64)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows.into_iter().map(|(a, n, id)| ((a, n), id)));
    }
    Ok(found)
}

pub async fn insert_story_arc_numbers(db: &SqlitePool, rows: &[(i64, Option<i64>)]) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(4)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO story_arc_number (story_arc_id, number, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, (arc_id, number)| {
            b.push_bind(*arc_id)
                .push_bind(*number)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

/// Identifier row key: `(source_id, id_type, key)`
pub type IdentifierRowKey = (Option<i64>, String, String);

pub async fn identifier_ids(db: &SqlitePool, keys: &[String]) -> Result<HashMap<IdentifierRowKey, i64>> {
    let mut found = HashMap::new();
    for chunk in keys.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT source_id, id_type, key, id FROM identifier WHERE key IN ");
        push_in_list(&mut qb, chunk.iter());
        let rows: Vec<(Option<i64>, String, String, i64)> =
            qb.build_query_as().fetch_all(db).await?;
        found.extend(rows.into_iter().map(|(s, t, k, id)| ((s, t, k), id)));
    }
    Ok(found)
}

pub async fn insert_identifiers(
    db: &SqlitePool,
    rows: &[(IdentifierRowKey, Option<String>)],
) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement(6)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO identifier (source_id, id_type, key, url, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, ((source_id, id_type, key), url)| {
            b.push_bind(*source_id)
                .push_bind(id_type)
                .push_bind(key)
                .push_bind(url)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

/// Delete dimension rows that no comic (directly or through a compound row)
/// references. Compound tables go first so their parents can follow.
pub async fn delete_orphan_named(db: &SqlitePool) -> Result<HashMap<&'static str, u64>> {
    let mut deleted = HashMap::new();

    for field in LinkField::ALL {
        let target = match field {
            LinkField::StoryArcNumbers => "story_arc_number",
            LinkField::Credits => "credit",
            LinkField::Identifiers => "identifier",
            _ => continue,
        };
        let sql = format!(
            "DELETE FROM {target} WHERE id NOT IN (SELECT target_id FROM {})",
            field.junction_table()
        );
        deleted.insert(target, sqlx::query(&sql).execute(db).await?.rows_affected());
    }

    for kind in NamedKind::ALL {
        let sql = match kind {
            NamedKind::StoryArc => {
                "DELETE FROM story_arc WHERE id NOT IN (SELECT story_arc_id FROM story_arc_number)"
                    .to_string()
            }
            NamedKind::CreditPerson => {
                "DELETE FROM credit_person WHERE id NOT IN (SELECT person_id FROM credit)".to_string()
            }
            NamedKind::CreditRole => "DELETE FROM credit_role WHERE id NOT IN \
                 (SELECT role_id FROM credit WHERE role_id IS NOT NULL)"
                .to_string(),
            NamedKind::IdentifierSource => "DELETE FROM identifier_source WHERE id NOT IN \
                 (SELECT source_id FROM identifier WHERE source_id IS NOT NULL)"
                .to_string(),
            simple => {
                let field = LinkField::ALL
                    .into_iter()
                    .find(|f| f.named_kind() == Some(simple));
                match field {
                    Some(field) => format!(
                        "DELETE FROM {} WHERE id NOT IN (SELECT target_id FROM {})",
                        simple.table(),
                        field.junction_table()
                    ),
                    None => continue,
                }
            }
        };
        deleted.insert(kind.table(), sqlx::query(&sql).execute(db).await?.rows_affected());
    }

    Ok(deleted)
}
