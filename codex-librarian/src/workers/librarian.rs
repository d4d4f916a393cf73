//! Librarian daemon
//!
//! Pops tasks off the shared [`TaskQueue`](crate::queue::TaskQueue) one at a
//! time and hands each to its worker. Tasks run on their own tokio task so a
//! panic in one is logged instead of taking the daemon down.

use super::covers::{CoverGenerator, CoverWorker};
use super::janitor::Janitor;
use super::search::SearchIndexer;
use crate::extractor::MetadataExtractor;
use crate::importer::Importer;
use crate::tasks::{LibrarianTask, RestartTask};
use crate::LibrarianState;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Why the daemon loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    /// Queue closed or shutdown signalled
    Shutdown,
    /// A restart was requested; the caller should rebuild and run again
    Restart,
}

pub struct LibrarianDaemon {
    state: LibrarianState,
    importer: Importer,
    covers: Arc<CoverWorker>,
}

impl LibrarianDaemon {
    pub fn new(
        state: LibrarianState,
        extractor: Arc<dyn MetadataExtractor>,
        cover_generator: Arc<dyn CoverGenerator>,
    ) -> Self {
        let importer = Importer::new(state.clone(), extractor);
        let covers = Arc::new(CoverWorker::new(state.clone(), cover_generator));
        Self {
            state,
            importer,
            covers,
        }
    }

    /// Run until the queue closes, shutdown is signalled, or a restart task
    /// arrives
    pub async fn run(self) -> DaemonExit {
        info!("Librarian daemon started");
        let exit = loop {
            let task = tokio::select! {
                _ = self.state.shutdown.cancelled() => break DaemonExit::Shutdown,
                task = self.state.queue.pop() => match task {
                    Some(task) => task,
                    None => break DaemonExit::Shutdown,
                },
            };

            if let LibrarianTask::Restart(kind) = task {
                info!(?kind, "Librarian stopping");
                self.state.shutdown.cancel();
                self.state.queue.close();
                break match kind {
                    RestartTask::Restart => DaemonExit::Restart,
                    RestartTask::Shutdown => DaemonExit::Shutdown,
                };
            }

            self.run_task(task).await;
        };
        info!(?exit, "Librarian daemon stopped");
        exit
    }

    /// Run one task to completion, logging failures and panics
    pub async fn run_task(&self, task: LibrarianTask) {
        let name = task.name();
        debug!(task = name, "Running task");

        let state = self.state.clone();
        let importer = self.importer.clone();
        let covers = self.covers.clone();
        let handle = tokio::spawn(async move { dispatch(state, importer, covers, task).await });

        match handle.await {
            Ok(Ok(())) => debug!(task = name, "Task finished"),
            Ok(Err(e)) => error!(task = name, error = %e, "Task failed"),
            Err(e) => error!(task = name, error = %e, "Task panicked"),
        }
    }
}

async fn dispatch(
    state: LibrarianState,
    importer: Importer,
    covers: Arc<CoverWorker>,
    task: LibrarianTask,
) -> Result<()> {
    match task {
        LibrarianTask::Import(task) => {
            importer.apply(task).await?;
        }
        LibrarianTask::LazyImport(task) => {
            importer.apply_lazy(task).await?;
        }
        LibrarianTask::AdoptOrphanFolders => {
            importer.adopt_orphan_folders().await?;
        }
        LibrarianTask::Janitor(task) => Janitor::new(state).handle(task).await?,
        LibrarianTask::SearchIndex(task) => {
            SearchIndexer::new(state).handle(task).await?;
        }
        LibrarianTask::Cover(task) => {
            covers.handle(task).await?;
        }
        LibrarianTask::Notify(task) => state.notifier.notice(task),
        LibrarianTask::Abort(kind) => {
            let removed = state.queue.remove_where(|t| t.abort_kind() == Some(kind));
            info!(?kind, removed, "Dropped queued tasks");
        }
        LibrarianTask::Restart(kind) => {
            // Handled by the daemon loop; only reachable through run_task
            debug!(?kind, "Restart ignored outside the daemon loop");
        }
    }
    Ok(())
}
