//! In-memory models shared by the importer and workers

pub mod library;
pub mod metadata;
pub mod stat;

pub use library::Library;
pub use metadata::*;
pub use stat::FileStat;
