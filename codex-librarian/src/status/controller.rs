//! Status row writes with throttling

use super::StatusType;
use crate::db::retry_on_lock;
use crate::workers::notifier::NotifierHandle;
use codex_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// In-memory progress of one running operation
#[derive(Debug, Clone)]
pub struct Status {
    pub status_type: StatusType,
    pub complete: i64,
    pub total: Option<i64>,
    pub subtitle: String,
    last_write: Option<Instant>,
}

impl Status {
    pub fn new(status_type: StatusType, total: Option<usize>) -> Self {
        Self {
            status_type,
            complete: 0,
            total: total.map(|t| t as i64),
            subtitle: String::new(),
            last_write: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = subtitle.into();
        self
    }

    pub fn increment(&mut self, count: usize) {
        self.complete += count as i64;
    }

    pub fn add_total(&mut self, count: usize) {
        self.total = Some(self.total.unwrap_or(0) + count as i64);
    }
}

/// Polled row of the status table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StatusRow {
    pub status_type: String,
    pub complete: Option<i64>,
    pub total: Option<i64>,
    pub subtitle: String,
    pub preactive: Option<String>,
    pub active: Option<String>,
}

/// Every status row that is queued or running
pub async fn load_statuses(db: &SqlitePool) -> Result<Vec<StatusRow>> {
    let rows = sqlx::query_as(
        "SELECT status_type, complete, total, subtitle, preactive, active FROM librarian_status \
         WHERE preactive IS NOT NULL OR active IS NOT NULL ORDER BY active, preactive, status_type",
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Writes status rows and pings the notifier.
///
/// Failures to write a status are logged and swallowed; progress reporting
/// never breaks the operation being reported.
///
/// Status writes do not take the shared [`WriteLock`](crate::db::WriteLock):
/// phases report progress while holding it. Each write goes through
/// [`retry_on_lock`] instead, so contention with another writer backs off
/// and retries rather than failing on `SQLITE_BUSY`.
#[derive(Clone)]
pub struct StatusController {
    db: SqlitePool,
    notifier: NotifierHandle,
    throttle: Duration,
    max_lock_wait_ms: u64,
}

impl StatusController {
    pub fn new(db: SqlitePool, notifier: NotifierHandle, throttle: Duration, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            notifier,
            throttle,
            max_lock_wait_ms,
        }
    }

    /// Ensure one row per status type and reset all of them to inactive
    pub async fn init_rows(&self) -> Result<()> {
        for status_type in StatusType::ALL {
            sqlx::query("INSERT OR IGNORE INTO librarian_status (status_type) VALUES (?)")
                .bind(status_type.code())
                .execute(&self.db)
                .await?;
        }
        self.reset(&StatusType::ALL).await?;
        Ok(())
    }

    /// Mark statuses as queued
    pub async fn start_many(&self, types: &[StatusType]) {
        let now = crate::db::now();
        let now = now.as_str();
        for status_type in types {
            let code = status_type.code();
            let result = retry_on_lock("status queue", self.max_lock_wait_ms, || {
                let db = &self.db;
                async move {
                    sqlx::query(
                        "UPDATE librarian_status SET preactive = ?, updated_at = CURRENT_TIMESTAMP \
                         WHERE status_type = ? AND active IS NULL",
                    )
                    .bind(now)
                    .bind(code)
                    .execute(db)
                    .await?;
                    Ok::<(), codex_common::Error>(())
                }
            })
            .await;
            if let Err(e) = result {
                warn!(status = code, error = %e, "Status queue write failed");
            }
        }
        self.notifier.status_changed();
    }

    /// Activate a status with its initial progress
    pub async fn start(&self, status: &mut Status) {
        let now = crate::db::now();
        let result = {
            let now = now.as_str();
            let snapshot: &Status = status;
            retry_on_lock("status start", self.max_lock_wait_ms, || {
                let db = &self.db;
                async move {
                    sqlx::query(
                        "UPDATE librarian_status SET complete = ?, total = ?, subtitle = ?, \
                         preactive = NULL, active = ?, updated_at = CURRENT_TIMESTAMP \
                         WHERE status_type = ?",
                    )
                    .bind(snapshot.complete)
                    .bind(snapshot.total)
                    .bind(snapshot.subtitle.as_str())
                    .bind(now)
                    .bind(snapshot.status_type.code())
                    .execute(db)
                    .await?;
                    Ok::<(), codex_common::Error>(())
                }
            })
            .await
        };
        if let Err(e) = result {
            warn!(status = status.status_type.code(), error = %e, "Status start write failed");
        }
        status.last_write = Some(Instant::now());
        self.notifier.status_changed();
    }

    /// Write progress. Skipped if the last write was within the throttle
    /// window, unless `force`.
    pub async fn update(&self, status: &mut Status, force: bool) {
        if !force {
            if let Some(last) = status.last_write {
                if last.elapsed() < self.throttle {
                    return;
                }
            }
        }
        self.write_progress(status).await;
        status.last_write = Some(Instant::now());
        self.notifier.status_changed();
    }

    /// Write the final progress, then reset the row. Pollers always see the
    /// completed count before the status goes inactive.
    pub async fn finish(&self, status: &Status) {
        self.write_progress(status).await;
        self.finish_many(&[status.status_type]).await;
    }

    /// Reset statuses to inactive
    pub async fn finish_many(&self, types: &[StatusType]) {
        if let Err(e) = self.reset(types).await {
            warn!(error = %e, "Status finish write failed");
        }
        self.notifier.status_changed();
    }

    /// Reset every status, used on startup and by the clear-status task
    pub async fn clear_all(&self) {
        self.finish_many(&StatusType::ALL).await;
    }

    async fn write_progress(&self, status: &Status) {
        let result = retry_on_lock("status update", self.max_lock_wait_ms, || {
            let db = &self.db;
            async move {
                sqlx::query(
                    "UPDATE librarian_status SET complete = ?, total = ?, subtitle = ?, \
                     updated_at = CURRENT_TIMESTAMP WHERE status_type = ?",
                )
                .bind(status.complete)
                .bind(status.total)
                .bind(status.subtitle.as_str())
                .bind(status.status_type.code())
                .execute(db)
                .await?;
                Ok::<(), codex_common::Error>(())
            }
        })
        .await;
        if let Err(e) = result {
            warn!(status = status.status_type.code(), error = %e, "Status update write failed");
        }
    }

    async fn reset(&self, types: &[StatusType]) -> Result<()> {
        retry_on_lock("status reset", self.max_lock_wait_ms, || {
            let db = &self.db;
            async move {
                let mut tx = db.begin().await?;
                for status_type in types {
                    sqlx::query(
                        "UPDATE librarian_status SET complete = NULL, total = NULL, subtitle = '', \
                         preactive = NULL, active = NULL, updated_at = CURRENT_TIMESTAMP \
                         WHERE status_type = ?",
                    )
                    .bind(status_type.code())
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
                Ok::<(), codex_common::Error>(())
            }
        })
        .await
    }
}
