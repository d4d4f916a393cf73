//! Debounced client notifications
//!
//! Status writes and notices arrive on an unbounded channel. The first message
//! opens a debounce window; everything received inside it is collapsed into
//! at most one `LibrarianStatusChanged` event plus one event per distinct
//! notice.

use chrono::Utc;
use codex_common::events::{Audience, CodexEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Notice for connected clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierTask {
    pub text: String,
    pub audience: Audience,
}

impl NotifierTask {
    pub fn new(text: impl Into<String>, audience: Audience) -> Self {
        Self {
            text: text.into(),
            audience,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierMessage {
    StatusChanged,
    Notice(NotifierTask),
}

/// Sending side, cloned into every worker
#[derive(Debug, Clone)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<NotifierMessage>,
}

impl NotifierHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NotifierMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Status table changed; clients should re-fetch it
    pub fn status_changed(&self) {
        let _ = self.tx.send(NotifierMessage::StatusChanged);
    }

    pub fn notice(&self, task: NotifierTask) {
        let _ = self.tx.send(NotifierMessage::Notice(task));
    }
}

#[derive(Debug, Default)]
struct Batch {
    status_changed: bool,
    notices: Vec<NotifierTask>,
}

impl Batch {
    fn add(&mut self, message: NotifierMessage) {
        match message {
            NotifierMessage::StatusChanged => self.status_changed = true,
            NotifierMessage::Notice(task) => {
                if !self.notices.contains(&task) {
                    self.notices.push(task);
                }
            }
        }
    }
}

/// Notifier worker
pub struct Notifier {
    rx: mpsc::UnboundedReceiver<NotifierMessage>,
    event_bus: EventBus,
    debounce: Duration,
}

impl Notifier {
    pub fn new(
        rx: mpsc::UnboundedReceiver<NotifierMessage>,
        event_bus: EventBus,
        debounce: Duration,
    ) -> Self {
        Self {
            rx,
            event_bus,
            debounce,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Notifier started");
        loop {
            let first = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let mut batch = Batch::default();
            batch.add(first);
            let deadline = Instant::now() + self.debounce;
            let mut closed = false;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    message = self.rx.recv() => match message {
                        Some(message) => batch.add(message),
                        None => {
                            closed = true;
                            break;
                        }
                    },
                }
            }

            self.flush(batch);
            if closed {
                break;
            }
        }
        info!("Notifier stopped");
    }

    fn flush(&self, batch: Batch) {
        let timestamp = Utc::now();
        if batch.status_changed {
            self.event_bus
                .emit_lossy(CodexEvent::LibrarianStatusChanged { timestamp });
        }
        for notice in batch.notices {
            debug!(text = %notice.text, "Sending notice");
            self.event_bus.emit_lossy(CodexEvent::Notice {
                text: notice.text,
                audience: notice.audience,
                timestamp,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_common::events::notices;

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_debounced_into_one_event_each() {
        let bus = EventBus::new(32);
        let mut events = bus.subscribe();
        let (handle, rx) = NotifierHandle::channel();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(
            Notifier::new(rx, bus.clone(), Duration::from_secs(1)).run(shutdown.clone()),
        );

        for _ in 0..10 {
            handle.status_changed();
            handle.notice(NotifierTask::new(notices::LIBRARY_CHANGED, Audience::All));
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut status_events = 0;
        let mut notice_events = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                CodexEvent::LibrarianStatusChanged { .. } => status_events += 1,
                CodexEvent::Notice { .. } => notice_events += 1,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(status_events, 1);
        assert_eq!(notice_events, 1);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_audiences_are_kept() {
        let bus = EventBus::new(32);
        let mut events = bus.subscribe();
        let (handle, rx) = NotifierHandle::channel();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(
            Notifier::new(rx, bus.clone(), Duration::from_millis(100)).run(shutdown.clone()),
        );

        handle.notice(NotifierTask::new(notices::FAILED_IMPORTS, Audience::Admins));
        handle.notice(NotifierTask::new(notices::FAILED_IMPORTS, Audience::All));
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut count = 0;
        while events.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 2);

        shutdown.cancel();
        worker.await.unwrap();
    }
}
