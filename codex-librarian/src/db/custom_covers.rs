//! Custom cover rows and their links to groups and folders

use super::{push_in_list, rows_per_statement, FILTER_BATCH_SIZE};
use codex_common::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// What a custom cover image decorates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverGroup {
    Publisher,
    Imprint,
    Series,
    StoryArc,
    Folder,
}

impl CoverGroup {
    pub fn code(&self) -> &'static str {
        match self {
            CoverGroup::Publisher => "p",
            CoverGroup::Imprint => "i",
            CoverGroup::Series => "s",
            CoverGroup::StoryArc => "a",
            CoverGroup::Folder => "f",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            CoverGroup::Publisher => "publisher",
            CoverGroup::Imprint => "imprint",
            CoverGroup::Series => "series",
            CoverGroup::StoryArc => "story_arc",
            CoverGroup::Folder => "folder",
        }
    }

    /// Groups matched by sort name
    pub const NAMED: [CoverGroup; 4] = [
        CoverGroup::Publisher,
        CoverGroup::Imprint,
        CoverGroup::Series,
        CoverGroup::StoryArc,
    ];
}

#[derive(Debug, Clone)]
pub struct NewCustomCover {
    pub path: String,
    pub name: String,
    pub sort_name: String,
    pub group: CoverGroup,
    pub stat: String,
}

/// Insert or refresh cover rows, returning `(path, id)` of every row written
pub async fn upsert_covers(
    db: &SqlitePool,
    library_id: i64,
    covers: &[NewCustomCover],
) -> Result<Vec<(String, i64)>> {
    let now = super::now();
    let mut written = Vec::new();
    for chunk in covers.chunks(rows_per_statement(8)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO custom_cover (library_id, path, name, sort_name, group_code, stat, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, c| {
            b.push_bind(library_id)
                .push_bind(&c.path)
                .push_bind(&c.name)
                .push_bind(&c.sort_name)
                .push_bind(c.group.code())
                .push_bind(&c.stat)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(
            " ON CONFLICT(library_id, path) DO UPDATE SET name = excluded.name, \
             sort_name = excluded.sort_name, group_code = excluded.group_code, \
             stat = excluded.stat, updated_at = excluded.updated_at RETURNING path, id",
        );
        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(db).await?;
        written.extend(rows);
    }
    Ok(written)
}

/// Delete covers by path, returning the deleted ids. Linked groups and
/// folders are unlinked by `ON DELETE SET NULL`.
pub async fn delete_covers(db: &SqlitePool, library_id: i64, paths: &[String]) -> Result<Vec<i64>> {
    let mut deleted = Vec::new();
    for chunk in paths.chunks(FILTER_BATCH_SIZE - 1) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM custom_cover WHERE library_id = ");
        qb.push_bind(library_id);
        qb.push(" AND path IN ");
        push_in_list(&mut qb, chunk.iter());
        qb.push(" RETURNING id");
        let ids: Vec<i64> = qb.build_query_scalar().fetch_all(db).await?;
        deleted.extend(ids);
    }
    Ok(deleted)
}

/// Move a cover row. Returns its id, or `None` if unknown.
pub async fn move_cover(
    db: &SqlitePool,
    library_id: i64,
    src: &str,
    cover: &NewCustomCover,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        "UPDATE custom_cover SET path = ?, name = ?, sort_name = ?, group_code = ?, stat = ?, \
         updated_at = ? WHERE library_id = ? AND path = ? RETURNING id",
    )
    .bind(&cover.path)
    .bind(&cover.name)
    .bind(&cover.sort_name)
    .bind(cover.group.code())
    .bind(&cover.stat)
    .bind(super::now())
    .bind(library_id)
    .bind(src)
    .fetch_optional(db)
    .await?;
    Ok(id)
}

/// Link a named-group cover to every group of its kind with the same sort
/// name. Returns rows linked.
pub async fn link_group_cover(db: &SqlitePool, group: CoverGroup, cover_id: i64, sort_name: &str) -> Result<u64> {
    let sql = match group {
        // story_arc has no sort_name column; match on the name itself
        CoverGroup::StoryArc => {
            "UPDATE story_arc SET custom_cover_id = ? WHERE LOWER(name) = LOWER(?)".to_string()
        }
        _ => format!(
            "UPDATE {} SET custom_cover_id = ? WHERE sort_name = ? COLLATE NOCASE",
            group.table()
        ),
    };
    let result = sqlx::query(&sql)
        .bind(cover_id)
        .bind(sort_name)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

/// Link a folder cover to the folder containing it
pub async fn link_folder_cover(db: &SqlitePool, library_id: i64, folder_path: &str, cover_id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE folder SET custom_cover_id = ? WHERE library_id = ? AND path = ?")
        .bind(cover_id)
        .bind(library_id)
        .bind(folder_path)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

/// Attach existing covers to groups created since the cover was imported
pub async fn link_unlinked_groups(db: &SqlitePool) -> Result<u64> {
    let mut linked = 0;
    for group in CoverGroup::NAMED {
        let name_match = match group {
            CoverGroup::StoryArc => "LOWER(cc.sort_name) = LOWER(story_arc.name)".to_string(),
            _ => format!("cc.sort_name = {}.sort_name COLLATE NOCASE", group.table()),
        };
        let sql = format!(
            "UPDATE {table} SET custom_cover_id = \
             (SELECT cc.id FROM custom_cover cc WHERE cc.group_code = ? AND {name_match} \
              ORDER BY cc.id LIMIT 1) \
             WHERE custom_cover_id IS NULL AND EXISTS \
             (SELECT 1 FROM custom_cover cc WHERE cc.group_code = ? AND {name_match})",
            table = group.table(),
        );
        linked += sqlx::query(&sql)
            .bind(group.code())
            .bind(group.code())
            .execute(db)
            .await?
            .rows_affected();
    }
    Ok(linked)
}

/// `(id, path)` for custom cover ids
pub async fn cover_paths(db: &SqlitePool, cover_ids: &[i64]) -> Result<Vec<(i64, String)>> {
    let mut found = Vec::new();
    for chunk in cover_ids.chunks(FILTER_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id, path FROM custom_cover WHERE id IN ");
        push_in_list(&mut qb, chunk.iter().copied());
        let rows: Vec<(i64, String)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows);
    }
    Ok(found)
}

/// Every custom cover id
pub async fn all_cover_ids(db: &SqlitePool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT id FROM custom_cover ORDER BY id")
        .fetch_all(db)
        .await?;
    Ok(ids)
}
