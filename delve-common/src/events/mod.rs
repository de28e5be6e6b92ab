//! Event types and in-process event bus
//!
//! Services publish state changes on the bus; the HTTP layer relays them to
//! SSE subscribers. Events are invalidation signals: a receiver that lags or
//! misses one re-reads the store, so delivery is best-effort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Delve event types
///
/// Serialized with a `type` tag so SSE clients can dispatch on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DelveEvent {
    /// A research session was accepted and charged
    ResearchSessionCreated {
        session_id: Uuid,
        org_id: Uuid,
        user_id: Uuid,
        research_type: String,
        credits_used: i64,
        timestamp: DateTime<Utc>,
    },

    /// Incremental progress from the generator
    ResearchProgress {
        session_id: Uuid,
        org_id: Uuid,
        step: String,
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    /// Session reached `completed`
    ResearchSessionCompleted {
        session_id: Uuid,
        org_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Session reached `failed`
    ResearchSessionFailed {
        session_id: Uuid,
        org_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An organization's balance changed
    CreditsChanged {
        org_id: Uuid,
        balance: i64,
        delta: i64,
        timestamp: DateTime<Utc>,
    },

    /// Membership, plan or other organization data changed
    OrganizationChanged {
        org_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DelveEvent {
    /// Organization the event belongs to
    pub fn org_id(&self) -> Uuid {
        match self {
            DelveEvent::ResearchSessionCreated { org_id, .. }
            | DelveEvent::ResearchProgress { org_id, .. }
            | DelveEvent::ResearchSessionCompleted { org_id, .. }
            | DelveEvent::ResearchSessionFailed { org_id, .. }
            | DelveEvent::CreditsChanged { org_id, .. }
            | DelveEvent::OrganizationChanged { org_id, .. } => *org_id,
        }
    }

    /// Research session the event refers to, if any
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            DelveEvent::ResearchSessionCreated { session_id, .. }
            | DelveEvent::ResearchProgress { session_id, .. }
            | DelveEvent::ResearchSessionCompleted { session_id, .. }
            | DelveEvent::ResearchSessionFailed { session_id, .. } => Some(*session_id),
            DelveEvent::CreditsChanged { .. } | DelveEvent::OrganizationChanged { .. } => None,
        }
    }

    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            DelveEvent::ResearchSessionCreated { .. } => "ResearchSessionCreated",
            DelveEvent::ResearchProgress { .. } => "ResearchProgress",
            DelveEvent::ResearchSessionCompleted { .. } => "ResearchSessionCompleted",
            DelveEvent::ResearchSessionFailed { .. } => "ResearchSessionFailed",
            DelveEvent::CreditsChanged { .. } => "CreditsChanged",
            DelveEvent::OrganizationChanged { .. } => "OrganizationChanged",
        }
    }

    /// True for events that end a session's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DelveEvent::ResearchSessionCompleted { .. } | DelveEvent::ResearchSessionFailed { .. }
        )
    }
}

/// Central event distribution bus
///
/// Thin wrapper over a tokio broadcast channel; clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DelveEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per receiver before the
    /// slowest receiver starts lagging.
    ///
    /// ```
    /// use delve_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(1000);
    /// assert_eq!(event_bus.capacity(), 1000);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<DelveEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: DelveEvent,
    ) -> Result<usize, broadcast::error::SendError<DelveEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DelveEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credits_event(org_id: Uuid) -> DelveEvent {
        DelveEvent::CreditsChanged {
            org_id,
            balance: 70,
            delta: -30,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert!(bus.emit(credits_event(Uuid::new_v4())).is_err());
        // Lossy emit never fails
        bus.emit_lossy(credits_event(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let org_id = Uuid::new_v4();
        bus.emit(credits_event(org_id)).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.org_id(), org_id);
        assert_eq!(received.event_type(), "CreditsChanged");
        assert!(received.session_id().is_none());
    }

    #[test]
    fn test_serialized_with_type_tag() {
        let session_id = Uuid::new_v4();
        let event = DelveEvent::ResearchSessionFailed {
            session_id,
            org_id: Uuid::new_v4(),
            error: "boom".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ResearchSessionFailed");
        assert_eq!(json["error"], "boom");
        assert!(event.is_terminal());
        assert_eq!(event.session_id(), Some(session_id));
    }
}
