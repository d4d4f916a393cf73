//! Errors shared by the Codex crates
//!
//! Archive and metadata failures stay in the librarian's `ExtractionError`;
//! these are the datastore and configuration failures both crates hit.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// codex.toml could not be read or written
    #[error("Config file {}: {reason}", path.display())]
    ConfigFile { path: PathBuf, reason: String },

    /// A config key parsed but holds an unusable value
    #[error("Config value {key}: {reason}")]
    ConfigValue { key: String, reason: String },

    /// A row in the settings table does not parse as its type
    #[error("Setting {key}: {reason}")]
    Setting { key: String, reason: String },

    #[error("Library {0} not found")]
    LibraryNotFound(i64),

    /// Lock contention outlasted the retry budget
    #[error("{operation}: database locked after {attempts} attempts")]
    DatabaseLocked { operation: String, attempts: u32 },
}

/// SQLite primary and extended codes for BUSY and LOCKED
const LOCK_CODES: [&str; 6] = ["5", "6", "261", "262", "517", "773"];

impl Error {
    /// True when SQLite reported the database as locked or busy.
    pub fn is_lock_error(&self) -> bool {
        let Error::Database(db_err) = self else {
            return false;
        };
        if let Some(code) = db_err.as_database_error().and_then(|e| e.code()) {
            if LOCK_CODES.contains(&code.as_ref()) {
                return true;
            }
        }
        let msg = db_err.to_string();
        msg.contains("database is locked") || msg.contains("database is busy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_detected_from_message() {
        let locked = Error::Database(sqlx::Error::Protocol("database is locked".into()));
        assert!(locked.is_lock_error());

        let other = Error::Database(sqlx::Error::RowNotFound);
        assert!(!other.is_lock_error());

        let gave_up = Error::DatabaseLocked {
            operation: "upsert comics".into(),
            attempts: 7,
        };
        assert!(!gave_up.is_lock_error());
        assert_eq!(gave_up.to_string(), "upsert comics: database locked after 7 attempts");
    }

    #[test]
    fn test_config_file_error_names_the_file() {
        let err = Error::ConfigFile {
            path: PathBuf::from("/etc/codex.toml"),
            reason: "expected `=`".into(),
        };
        assert_eq!(err.to_string(), "Config file /etc/codex.toml: expected `=`");
    }
}
