//! Delayed and time-of-day task triggers

use crate::queue::TaskQueue;
use crate::tasks::{JanitorTask, LibrarianTask};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Push tasks after a delay, coalescing by key.
///
/// While a key is pending, further schedules under that key are dropped, so
/// a burst of imports produces one search index update.
#[derive(Debug, Clone)]
pub struct DelayedTasks {
    queue: TaskQueue,
    pending: Arc<Mutex<HashSet<String>>>,
    shutdown: CancellationToken,
}

impl DelayedTasks {
    pub fn new(queue: TaskQueue, shutdown: CancellationToken) -> Self {
        Self {
            queue,
            pending: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    /// Returns false if a task under `key` is already waiting
    pub fn schedule(&self, key: &str, delay: Duration, task: LibrarianTask) -> bool {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if !pending.insert(key.to_string()) {
                debug!(key, "Delayed task already pending");
                return false;
            }
        }

        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = this.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    this.release(&key);
                    debug!(key = %key, task = task.name(), "Delayed task due");
                    this.queue.push(task);
                    return;
                }
            }
            this.release(&key);
        });
        true
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    fn release(&self, key: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Next local time at `hour:00` strictly after `now`
pub fn next_nightly<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        // Skips a day whose hour does not exist locally (DST gap)
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > *now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => return now.clone() + ChronoDuration::days(1),
        }
    }
}

/// Push `Janitor(Nightly)` every day at `hour` local time until shutdown
pub async fn run_nightly(queue: TaskQueue, hour: u32, shutdown: CancellationToken) {
    info!(hour, "Nightly scheduler started");
    loop {
        let now = Local::now();
        let next = next_nightly(&now, hour);
        let wait = (next - now).to_std().unwrap_or(Duration::from_secs(60));
        debug!(next = %next, "Next nightly janitor run");

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                queue.push(LibrarianTask::Janitor(JanitorTask::Nightly));
            }
        }
    }
    info!("Nightly scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::SearchIndexTask;
    use chrono::Utc;

    fn update() -> LibrarianTask {
        LibrarianTask::SearchIndex(SearchIndexTask::Update { rebuild: false })
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_coalesces_by_key() {
        let queue = TaskQueue::new();
        let delayed = DelayedTasks::new(queue.clone(), CancellationToken::new());

        assert!(delayed.schedule("search", Duration::from_secs(5), update()));
        assert!(!delayed.schedule("search", Duration::from_secs(5), update()));
        assert!(delayed.is_pending("search"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len(), 1);
        assert!(!delayed.is_pending("search"));

        // Released keys schedule again
        assert!(delayed.schedule("search", Duration::from_secs(5), update()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending() {
        let queue = TaskQueue::new();
        let shutdown = CancellationToken::new();
        let delayed = DelayedTasks::new(queue.clone(), shutdown.clone());

        delayed.schedule("search", Duration::from_secs(5), update());
        shutdown.cancel();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(queue.is_empty());
    }

    #[test]
    fn test_next_nightly() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 1, 30, 0).unwrap();
        assert_eq!(next_nightly(&now, 3), Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap());
        assert_eq!(next_nightly(&now, 0), Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
        assert_eq!(next_nightly(&now, 1), Utc.with_ymd_and_hms(2024, 3, 11, 1, 0, 0).unwrap());
    }
}
