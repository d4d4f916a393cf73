//! Event types for the Codex event system
//!
//! Provides shared event definitions and the EventBus that connected clients
//! (API layer, websockets) subscribe to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Who a notice is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// Every connected client
    All,
    /// Administrators only
    Admins,
}

/// Well-known notice texts sent to clients
pub mod notices {
    /// Library contents changed, browsers should refresh
    pub const LIBRARY_CHANGED: &str = "LIBRARY_CHANGED";
    /// Failed import list changed
    pub const FAILED_IMPORTS: &str = "FAILED_IMPORTS";
    /// Covers were regenerated or removed
    pub const COVERS_CHANGED: &str = "COVERS_CHANGED";
    /// Search index finished an update
    pub const SEARCH_INDEX_UPDATED: &str = "SEARCH_INDEX_UPDATED";
}

/// Codex event types
///
/// Events are broadcast via EventBus and can be serialized for client
/// transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CodexEvent {
    /// Librarian status table changed. Clients re-fetch the table.
    LibrarianStatusChanged {
        timestamp: DateTime<Utc>,
    },

    /// Free-form notice for a client audience
    Notice {
        text: String,
        audience: Audience,
        timestamp: DateTime<Utc>,
    },

    /// An import apply finished (also emitted when aborted)
    ImportFinished {
        run_id: Uuid,
        library_id: i64,
        created: usize,
        updated: usize,
        deleted: usize,
        failed: usize,
        aborted: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// ```
/// use codex_common::events::{CodexEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
/// event_bus.emit_lossy(CodexEvent::LibrarianStatusChanged {
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CodexEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CodexEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CodexEvent,
    ) -> Result<usize, broadcast::error::SendError<CodexEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CodexEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(10);
        let result = bus.emit(CodexEvent::LibrarianStatusChanged {
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_notice() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(CodexEvent::Notice {
            text: notices::LIBRARY_CHANGED.to_string(),
            audience: Audience::All,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            CodexEvent::Notice { text, audience, .. } => {
                assert_eq!(text, notices::LIBRARY_CHANGED);
                assert_eq!(audience, Audience::All);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(CodexEvent::Notice {
            text: "x".to_string(),
            audience: Audience::Admins,
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "Notice");
        assert_eq!(json["audience"], "admins");
    }
}
