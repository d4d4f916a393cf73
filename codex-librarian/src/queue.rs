//! Shared priority task queue
//!
//! Higher [`TaskPriority`] pops first; equal priorities pop in arrival order.
//! Cloned handles share one queue and are passed to every producer.

use crate::tasks::{LibrarianTask, TaskPriority};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug)]
struct Queued {
    priority: TaskPriority,
    seq: u64,
    task: LibrarianTask,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct Inner {
    heap: Mutex<BinaryHeap<Queued>>,
    notify: Notify,
    seq: AtomicU64,
    closed: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: LibrarianTask) {
        let queued = Queued {
            priority: task.priority(),
            seq: self.inner.seq.fetch_add(1, AtomicOrdering::SeqCst),
            task,
        };
        self.lock().push(queued);
        self.inner.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<LibrarianTask> {
        self.lock().pop().map(|q| q.task)
    }

    /// Wait for the next task. Returns `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<LibrarianTask> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(task) = self.try_pop() {
                return Some(task);
            }
            if self.inner.closed.load(AtomicOrdering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Drop queued tasks matching `predicate`, returning how many went
    pub fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&LibrarianTask) -> bool,
    {
        let mut heap = self.lock();
        let before = heap.len();
        heap.retain(|q| !predicate(&q.task));
        before - heap.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake waiters; `pop` returns `None` once empty
    pub fn close(&self) {
        self.inner.closed.store(true, AtomicOrdering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Queued>> {
        self.inner.heap.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortKind;
    use crate::tasks::{ImportTask, JanitorTask, SearchIndexTask};

    fn import(library_id: i64) -> LibrarianTask {
        LibrarianTask::Import(ImportTask {
            library_id,
            ..Default::default()
        })
    }

    #[test]
    fn test_pops_by_priority_then_fifo() {
        let queue = TaskQueue::new();
        queue.push(LibrarianTask::SearchIndex(SearchIndexTask::Optimize));
        queue.push(import(1));
        queue.push(LibrarianTask::Janitor(JanitorTask::Nightly));
        queue.push(import(2));
        queue.push(LibrarianTask::Janitor(JanitorTask::ClearStatus));

        assert_eq!(
            queue.try_pop(),
            Some(LibrarianTask::Janitor(JanitorTask::ClearStatus))
        );
        assert_eq!(queue.try_pop(), Some(LibrarianTask::Janitor(JanitorTask::Nightly)));
        assert_eq!(queue.try_pop(), Some(import(1)));
        assert_eq!(queue.try_pop(), Some(import(2)));
        assert_eq!(
            queue.try_pop(),
            Some(LibrarianTask::SearchIndex(SearchIndexTask::Optimize))
        );
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_remove_where_drops_matching() {
        let queue = TaskQueue::new();
        queue.push(import(1));
        queue.push(import(2));
        queue.push(LibrarianTask::Janitor(JanitorTask::Vacuum));

        let removed = queue.remove_where(|t| t.abort_kind() == Some(AbortKind::Import));
        assert_eq!(removed, 2);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = TaskQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(import(7));

        assert_eq!(consumer.await.unwrap(), Some(import(7)));
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let queue = TaskQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.close();

        assert_eq!(consumer.await.unwrap(), None);
    }
}
