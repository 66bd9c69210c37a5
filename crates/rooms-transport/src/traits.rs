//! Transport abstraction traits.
//!
//! These traits define what the session manager needs from a stream
//! transport, allowing it to stay transport-agnostic.

use async_trait::async_trait;
use rooms_protocol::{EventName, Frame, Message, ProtocolError, Topic};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Callback invoked for every frame delivered to a listener.
pub type EventHandler = Arc<dyn Fn(Frame) + Send + Sync>;

static LISTENER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies one registered listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl ListenerId {
    /// Allocate a process-unique listener ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(LISTENER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener_{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport is not connected.
    #[error("Transport disconnected")]
    Disconnected,

    /// A request/reply call failed on the remote side.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A stream transport.
///
/// Implementations must guarantee that once `unsubscribe` returns, the
/// removed handler is never invoked again. Delivery is at-least-once; the
/// session manager treats duplicates idempotently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register a handler for an event on a topic.
    fn subscribe(&self, topic: Topic, event: EventName, handler: EventHandler) -> ListenerId;

    /// Remove a handler.
    ///
    /// Returns `true` if the listener was registered.
    fn unsubscribe(&self, topic: &Topic, event: EventName, listener: ListenerId) -> bool;

    /// Fetch messages newer than `since_ts` for a room.
    async fn request_missed_messages(
        &self,
        room_id: &str,
        since_ts: u64,
    ) -> Result<Vec<Message>, TransportError>;

    /// Connectivity signal: `true` while connected.
    fn connectivity(&self) -> watch::Receiver<bool>;

    /// Get the transport name (e.g., "local").
    fn name(&self) -> &'static str;

    /// Register a handler for a room-scoped event.
    fn subscribe_room_event(
        &self,
        room_id: &str,
        event: EventName,
        handler: EventHandler,
    ) -> ListenerId {
        self.subscribe(Topic::Room(room_id.to_string()), event, handler)
    }

    /// Remove a room-scoped handler.
    fn unsubscribe_room_event(&self, room_id: &str, event: EventName, listener: ListenerId) -> bool {
        self.unsubscribe(&Topic::Room(room_id.to_string()), event, listener)
    }

    /// Register a handler for a user-scoped event.
    fn subscribe_user_event(
        &self,
        user_id: &str,
        event: EventName,
        handler: EventHandler,
    ) -> ListenerId {
        self.subscribe(Topic::User(user_id.to_string()), event, handler)
    }

    /// Remove a user-scoped handler.
    fn unsubscribe_user_event(&self, user_id: &str, event: EventName, listener: ListenerId) -> bool {
        self.unsubscribe(&Topic::User(user_id.to_string()), event, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_id_generation() {
        let id1 = ListenerId::generate();
        let id2 = ListenerId::generate();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("listener_"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::RequestFailed("timeout".into());
        assert_eq!(err.to_string(), "Request failed: timeout");
    }
}
