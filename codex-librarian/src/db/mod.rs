//! Database operations for the librarian
//!
//! Every helper returns `codex_common::Result`. Bulk helpers chunk their input
//! so a single statement never binds more than [`FILTER_BATCH_SIZE`] values.

pub mod comics;
pub mod custom_covers;
pub mod failed_imports;
pub mod folders;
pub mod groups;
pub mod libraries;
pub mod links;
pub mod named;
pub mod retry;
pub mod settings;

pub use retry::retry_on_lock;

use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;

/// Maximum bind arguments per statement
pub const FILTER_BATCH_SIZE: usize = 990;

/// Rows per multi-row INSERT for a table of `columns` bound columns
pub fn rows_per_statement(columns: usize) -> usize {
    (FILTER_BATCH_SIZE / columns.max(1)).max(1)
}

/// Process-wide datastore write lock. Every mutating import phase, janitor
/// and search-index write holds it.
pub type WriteLock = Arc<tokio::sync::Mutex<()>>;

pub fn new_write_lock() -> WriteLock {
    Arc::new(tokio::sync::Mutex::new(()))
}

/// Timestamp text in the same shape as `CURRENT_TIMESTAMP` plus micros
pub fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Append `(?, ?, ...)` binding every value
pub(crate) fn push_in_list<'args, T, I>(qb: &mut QueryBuilder<'args, Sqlite>, values: I)
where
    I: IntoIterator<Item = T>,
    T: 'args + sqlx::Encode<'args, Sqlite> + sqlx::Type<Sqlite>,
{
    qb.push("(");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

/// Filter matching `column` equal to a directory or anywhere beneath it.
///
/// Bind with [`TreeFilter`] values in order: `dir`, `prefix_len`, `prefix`.
pub(crate) fn tree_filter(column: &str) -> String {
    format!("({column} = ? OR substr({column}, 1, ?) = ?)")
}

/// Bind values for [`tree_filter`]. SQLite `substr` counts characters.
pub(crate) struct TreeFilter {
    pub dir: String,
    pub prefix_len: i64,
    pub prefix: String,
}

impl TreeFilter {
    pub fn new(dir: &str) -> Self {
        let dir = dir.trim_end_matches('/').to_string();
        let prefix = format!("{}/", dir);
        Self {
            prefix_len: prefix.chars().count() as i64,
            dir,
            prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_filter_counts_characters() {
        let filter = TreeFilter::new("/lib/Café/");
        assert_eq!(filter.dir, "/lib/Café");
        assert_eq!(filter.prefix, "/lib/Café/");
        assert_eq!(filter.prefix_len, 10);
    }

    #[test]
    fn test_rows_per_statement_stays_under_limit() {
        assert_eq!(rows_per_statement(2), 495);
        assert_eq!(rows_per_statement(25), 39);
        assert!(rows_per_statement(25) * 25 <= FILTER_BATCH_SIZE);
        assert_eq!(rows_per_statement(2000), 1);
    }
}
