//! Error types for codex-librarian

use std::path::PathBuf;
use thiserror::Error;

/// Metadata extraction failure for one comic path.
///
/// The `Display` string is what gets stored as the failed import reason.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Archive exists but could not be opened or parsed
    #[error("Unreadable archive {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    /// File extension is not a known comic archive format
    #[error("Unsupported comic format: {0}")]
    Unsupported(PathBuf),

    /// Embedded metadata was present but invalid
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking extraction task itself died
    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Marker error returned by importer phases when the import abort token fires.
///
/// Phases propagate it with `?`; `Importer::apply` treats it as a clean stop.
#[derive(Debug, Error)]
#[error("Import aborted")]
pub struct Aborted;
