//! codex-librarian library interface
//!
//! Exposes the importer, the task queue and the background workers so the
//! binary and integration tests can assemble them.

pub mod abort;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod extractor;
pub mod importer;
pub mod models;
pub mod queue;
pub mod status;
pub mod tasks;
pub mod workers;

use crate::abort::{AbortKind, AbortSignals};
use crate::config::LibrarianConfig;
use crate::db::WriteLock;
use crate::queue::TaskQueue;
use crate::status::StatusController;
use crate::tasks::LibrarianTask;
use crate::workers::notifier::{NotifierHandle, NotifierMessage};
use crate::workers::scheduler::DelayedTasks;
use codex_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Handles shared by every librarian worker
///
/// Nothing here is global: each `LibrarianState` owns its own queue, lock
/// and signals, so tests can run isolated instances side by side.
#[derive(Clone)]
pub struct LibrarianState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub queue: TaskQueue,
    pub abort: AbortSignals,
    /// Serializes datastore writes across workers
    pub write_lock: WriteLock,
    pub status: StatusController,
    pub notifier: NotifierHandle,
    pub delayed: DelayedTasks,
    pub config: Arc<LibrarianConfig>,
    /// Cancelled on shutdown or restart
    pub shutdown: CancellationToken,
}

impl LibrarianState {
    /// Build the shared handles. The returned receiver feeds the notifier
    /// worker.
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: LibrarianConfig,
    ) -> (Self, mpsc::UnboundedReceiver<NotifierMessage>) {
        let (notifier, rx) = NotifierHandle::channel();
        let queue = TaskQueue::new();
        let shutdown = CancellationToken::new();
        let status = StatusController::new(
            db.clone(),
            notifier.clone(),
            config.status_throttle,
            config.max_lock_wait_ms,
        );
        let delayed = DelayedTasks::new(queue.clone(), shutdown.clone());

        let state = Self {
            db,
            event_bus,
            queue,
            abort: AbortSignals::new(),
            write_lock: db::new_write_lock(),
            status,
            notifier,
            delayed,
            config: Arc::new(config),
            shutdown,
        };
        (state, rx)
    }

    /// Queue a task for the librarian daemon
    pub fn enqueue(&self, task: LibrarianTask) {
        self.queue.push(task);
    }

    /// Stop the running task of `kind` at its next batch boundary and drop
    /// queued ones
    pub fn abort(&self, kind: AbortKind) {
        info!(?kind, "Abort requested");
        self.abort.abort(kind);
        self.queue.push(LibrarianTask::Abort(kind));
    }
}
