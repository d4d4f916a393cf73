//! Librarian progress statuses
//!
//! One `librarian_status` row per [`StatusType`]. A row is inactive (all
//! progress columns NULL), preactive (queued), or active with
//! `complete`/`total` progress. Clients poll the table; the notifier pushes a
//! payload-free "status changed" signal.

mod controller;

pub use controller::{load_statuses, Status, StatusController, StatusRow};

use serde::{Deserialize, Serialize};

/// Every long-running operation with its own progress row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusType {
    // Importer, in phase order
    FilesSettle,
    DirsMoved,
    FilesMoved,
    CoversMoved,
    DirsModified,
    ReadMetadata,
    AggregateMetadata,
    QueryMissingFks,
    CreateFks,
    FilesModified,
    FilesCreated,
    LinkMetadata,
    FailedImports,
    CoversModified,
    CoversCreated,
    DirsDeleted,
    FilesDeleted,
    CoversDeleted,
    GroupCounts,
    AdoptFolders,
    // Janitor
    JanitorCleanupFks,
    JanitorRecount,
    JanitorCleanupFailed,
    JanitorVacuum,
    JanitorBackup,
    JanitorIntegrityCheck,
    JanitorForeignKeyCheck,
    // Search index
    SearchIndexUpdate,
    SearchIndexRemoveStale,
    SearchIndexOptimize,
    SearchIndexClear,
    // Covers
    CoversCreate,
    CoversPurge,
    CoversCleanup,
}

impl StatusType {
    pub const ALL: [StatusType; 34] = [
        StatusType::FilesSettle,
        StatusType::DirsMoved,
        StatusType::FilesMoved,
        StatusType::CoversMoved,
        StatusType::DirsModified,
        StatusType::ReadMetadata,
        StatusType::AggregateMetadata,
        StatusType::QueryMissingFks,
        StatusType::CreateFks,
        StatusType::FilesModified,
        StatusType::FilesCreated,
        StatusType::LinkMetadata,
        StatusType::FailedImports,
        StatusType::CoversModified,
        StatusType::CoversCreated,
        StatusType::DirsDeleted,
        StatusType::FilesDeleted,
        StatusType::CoversDeleted,
        StatusType::GroupCounts,
        StatusType::AdoptFolders,
        StatusType::JanitorCleanupFks,
        StatusType::JanitorRecount,
        StatusType::JanitorCleanupFailed,
        StatusType::JanitorVacuum,
        StatusType::JanitorBackup,
        StatusType::JanitorIntegrityCheck,
        StatusType::JanitorForeignKeyCheck,
        StatusType::SearchIndexUpdate,
        StatusType::SearchIndexRemoveStale,
        StatusType::SearchIndexOptimize,
        StatusType::SearchIndexClear,
        StatusType::CoversCreate,
        StatusType::CoversPurge,
        StatusType::CoversCleanup,
    ];

    /// Statuses owned by one import apply
    pub const IMPORT: [StatusType; 19] = [
        StatusType::FilesSettle,
        StatusType::DirsMoved,
        StatusType::FilesMoved,
        StatusType::CoversMoved,
        StatusType::DirsModified,
        StatusType::ReadMetadata,
        StatusType::AggregateMetadata,
        StatusType::QueryMissingFks,
        StatusType::CreateFks,
        StatusType::FilesModified,
        StatusType::FilesCreated,
        StatusType::LinkMetadata,
        StatusType::FailedImports,
        StatusType::CoversModified,
        StatusType::CoversCreated,
        StatusType::DirsDeleted,
        StatusType::FilesDeleted,
        StatusType::CoversDeleted,
        StatusType::GroupCounts,
    ];

    /// Stable code stored in `librarian_status.status_type`
    pub fn code(&self) -> &'static str {
        match self {
            StatusType::FilesSettle => "IFS",
            StatusType::DirsMoved => "IDM",
            StatusType::FilesMoved => "IFM",
            StatusType::CoversMoved => "ICM",
            StatusType::DirsModified => "IDU",
            StatusType::ReadMetadata => "IRT",
            StatusType::AggregateMetadata => "IAT",
            StatusType::QueryMissingFks => "IQT",
            StatusType::CreateFks => "ICT",
            StatusType::FilesModified => "IFU",
            StatusType::FilesCreated => "IFC",
            StatusType::LinkMetadata => "ILT",
            StatusType::FailedImports => "IFI",
            StatusType::CoversModified => "ICU",
            StatusType::CoversCreated => "ICC",
            StatusType::DirsDeleted => "IDD",
            StatusType::FilesDeleted => "IFD",
            StatusType::CoversDeleted => "ICD",
            StatusType::GroupCounts => "IGU",
            StatusType::AdoptFolders => "IAF",
            StatusType::JanitorCleanupFks => "JCT",
            StatusType::JanitorRecount => "JRC",
            StatusType::JanitorCleanupFailed => "JCF",
            StatusType::JanitorVacuum => "JDV",
            StatusType::JanitorBackup => "JDB",
            StatusType::JanitorIntegrityCheck => "JIC",
            StatusType::JanitorForeignKeyCheck => "JFK",
            StatusType::SearchIndexUpdate => "SIU",
            StatusType::SearchIndexRemoveStale => "SID",
            StatusType::SearchIndexOptimize => "SIO",
            StatusType::SearchIndexClear => "SIX",
            StatusType::CoversCreate => "CCC",
            StatusType::CoversPurge => "CCD",
            StatusType::CoversCleanup => "CCO",
        }
    }

    /// Human-readable title for clients
    pub fn title(&self) -> &'static str {
        match self {
            StatusType::FilesSettle => "Wait for files to settle",
            StatusType::DirsMoved => "Move folders",
            StatusType::FilesMoved => "Move comics",
            StatusType::CoversMoved => "Move custom covers",
            StatusType::DirsModified => "Update folders",
            StatusType::ReadMetadata => "Read metadata",
            StatusType::AggregateMetadata => "Aggregate metadata",
            StatusType::QueryMissingFks => "Query missing tags",
            StatusType::CreateFks => "Create missing tags",
            StatusType::FilesModified => "Update comics",
            StatusType::FilesCreated => "Create comics",
            StatusType::LinkMetadata => "Link tags",
            StatusType::FailedImports => "Record failed imports",
            StatusType::CoversModified => "Update custom covers",
            StatusType::CoversCreated => "Create custom covers",
            StatusType::DirsDeleted => "Delete folders",
            StatusType::FilesDeleted => "Delete comics",
            StatusType::CoversDeleted => "Delete custom covers",
            StatusType::GroupCounts => "Update group counts",
            StatusType::AdoptFolders => "Adopt orphan folders",
            StatusType::JanitorCleanupFks => "Remove unused tags",
            StatusType::JanitorRecount => "Recount groups",
            StatusType::JanitorCleanupFailed => "Clean up failed imports",
            StatusType::JanitorVacuum => "Compact database",
            StatusType::JanitorBackup => "Back up database",
            StatusType::JanitorIntegrityCheck => "Check database integrity",
            StatusType::JanitorForeignKeyCheck => "Check foreign keys",
            StatusType::SearchIndexUpdate => "Update search index",
            StatusType::SearchIndexRemoveStale => "Remove stale search entries",
            StatusType::SearchIndexOptimize => "Optimize search index",
            StatusType::SearchIndexClear => "Clear search index",
            StatusType::CoversCreate => "Create covers",
            StatusType::CoversPurge => "Purge covers",
            StatusType::CoversCleanup => "Remove orphan covers",
        }
    }
}
