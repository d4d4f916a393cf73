//! Folder rows and path-tree moves

use super::{push_in_list, rows_per_statement, tree_filter, TreeFilter, FILTER_BATCH_SIZE};
use codex_common::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

/// A folder row to insert. `parent_folder_id` is `None` only directly under
/// the library root.
#[derive(Debug, Clone)]
pub struct NewFolder {
    pub path: String,
    pub name: String,
    pub sort_name: String,
    pub parent_folder_id: Option<i64>,
    pub stat: String,
}

/// Ids of the given folder paths that exist
pub async fn folder_ids(
    db: &SqlitePool,
    library_id: i64,
    paths: &[String],
) -> Result<HashMap<String, i64>> {
    let mut found = HashMap::new();
    for chunk in paths.chunks(FILTER_BATCH_SIZE - 1) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT path, id FROM folder WHERE library_id = ");
        qb.push_bind(library_id);
        qb.push(" AND path IN ");
        push_in_list(&mut qb, chunk.iter());
        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(db).await?;
        found.extend(rows);
    }
    Ok(found)
}

/// Insert folders. All parents must already exist.
pub async fn insert_folders(db: &SqlitePool, library_id: i64, folders: &[NewFolder]) -> Result<u64> {
    let now = super::now();
    let mut inserted = 0;
    for chunk in folders.chunks(rows_per_statement(8)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO folder (library_id, parent_folder_id, path, name, sort_name, stat, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut b, f| {
            b.push_bind(library_id)
                .push_bind(f.parent_folder_id)
                .push_bind(&f.path)
                .push_bind(&f.name)
                .push_bind(&f.sort_name)
                .push_bind(&f.stat)
                .push_bind(&now)
                .push_bind(&now);
        });
        qb.push(
            " ON CONFLICT(library_id, path) DO UPDATE SET \
             parent_folder_id = excluded.parent_folder_id, updated_at = excluded.updated_at",
        );
        inserted += qb.build().execute(db).await?.rows_affected();
    }
    Ok(inserted)
}

pub async fn update_folder_stat(db: &SqlitePool, library_id: i64, path: &str, stat: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE folder SET stat = ?, updated_at = ? WHERE library_id = ? AND path = ?",
    )
    .bind(stat)
    .bind(super::now())
    .bind(library_id)
    .bind(path)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Rewrite every path under `src` to live under `dest`, in folders, comics,
/// failed imports and custom covers, in one transaction. Returns the number
/// of folder rows moved; zero means `src` was unknown.
pub async fn move_tree(db: &SqlitePool, library_id: i64, src: &str, dest: &str) -> Result<u64> {
    let filter = TreeFilter::new(src);
    let src_len = filter.dir.chars().count() as i64;
    let now = super::now();
    let mut tx = db.begin().await?;
    let mut folders_moved = 0;

    for table in ["folder", "comic", "failed_import", "custom_cover"] {
        let sql = format!(
            "UPDATE {table} SET path = ? || substr(path, ?), updated_at = ? \
             WHERE library_id = ? AND {}",
            tree_filter("path")
        );
        let result = sqlx::query(&sql)
            .bind(dest)
            .bind(src_len + 1)
            .bind(&now)
            .bind(library_id)
            .bind(&filter.dir)
            .bind(filter.prefix_len)
            .bind(&filter.prefix)
            .execute(&mut *tx)
            .await?;
        if table == "folder" {
            folders_moved = result.rows_affected();
        }
    }

    tx.commit().await?;
    Ok(folders_moved)
}

/// Point a folder at its new parent and refresh name and stat after a move
pub async fn reparent_folder(
    db: &SqlitePool,
    library_id: i64,
    path: &str,
    parent_folder_id: Option<i64>,
    name: &str,
    sort_name: &str,
    stat: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE folder SET parent_folder_id = ?, name = ?, sort_name = ?, stat = ?, updated_at = ? \
         WHERE library_id = ? AND path = ?",
    )
    .bind(parent_folder_id)
    .bind(name)
    .bind(sort_name)
    .bind(stat)
    .bind(super::now())
    .bind(library_id)
    .bind(path)
    .execute(db)
    .await?;
    Ok(())
}

/// Ids of comics at or beneath a directory
pub async fn comic_ids_in_tree(db: &SqlitePool, library_id: i64, dir: &str) -> Result<Vec<i64>> {
    let filter = TreeFilter::new(dir);
    let sql = format!(
        "SELECT id FROM comic WHERE library_id = ? AND {} ORDER BY id",
        tree_filter("path")
    );
    let ids = sqlx::query_scalar(&sql)
        .bind(library_id)
        .bind(&filter.dir)
        .bind(filter.prefix_len)
        .bind(&filter.prefix)
        .fetch_all(db)
        .await?;
    Ok(ids)
}

/// Delete folders and everything beneath them.
///
/// Sub-folders and comics go by cascade; failed imports and custom covers in
/// the tree are removed explicitly. Returns the number of folder rows named.
pub async fn delete_folder_trees(db: &SqlitePool, library_id: i64, dirs: &[String]) -> Result<u64> {
    let mut deleted = 0;
    let mut tx = db.begin().await?;
    for dir in dirs {
        let filter = TreeFilter::new(dir);
        for table in ["failed_import", "custom_cover"] {
            let sql = format!(
                "DELETE FROM {table} WHERE library_id = ? AND {}",
                tree_filter("path")
            );
            sqlx::query(&sql)
                .bind(library_id)
                .bind(&filter.dir)
                .bind(filter.prefix_len)
                .bind(&filter.prefix)
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query("DELETE FROM folder WHERE library_id = ? AND path = ?")
            .bind(library_id)
            .bind(&filter.dir)
            .execute(&mut *tx)
            .await?;
        deleted += result.rows_affected();
    }
    tx.commit().await?;
    Ok(deleted)
}

/// Folders with no parent link, `(id, path)`
pub async fn parentless_folders(db: &SqlitePool, library_id: i64) -> Result<Vec<(i64, String)>> {
    let rows = sqlx::query_as(
        "SELECT id, path FROM folder WHERE library_id = ? AND parent_folder_id IS NULL ORDER BY path",
    )
    .bind(library_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn set_folder_parent(db: &SqlitePool, folder_id: i64, parent_folder_id: i64) -> Result<()> {
    sqlx::query("UPDATE folder SET parent_folder_id = ?, updated_at = ? WHERE id = ?")
        .bind(parent_folder_id)
        .bind(super::now())
        .bind(folder_id)
        .execute(db)
        .await?;
    Ok(())
}
