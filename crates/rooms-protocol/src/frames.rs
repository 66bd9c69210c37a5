//! Frame types for the room event stream.
//!
//! Every event the stream delivers is a [`Frame`]. A frame belongs to exactly
//! one [`Topic`] (a room or a user) and one [`EventName`]; subscribers listen
//! on a `(topic, event)` pair.

use crate::message::{BulkDelete, Message, Subscription, User};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stream event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum EventName {
    RoomMessages = 0x01,
    DeleteMessage = 0x02,
    DeleteMessageBulk = 0x03,
    UserMessage = 0x04,
    SubscriptionsChanged = 0x05,
    UserStatus = 0x06,
}

impl EventName {
    /// Name used by the stream server for this event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::RoomMessages => "room-messages",
            EventName::DeleteMessage => "deleteMessage",
            EventName::DeleteMessageBulk => "deleteMessageBulk",
            EventName::UserMessage => "message",
            EventName::SubscriptionsChanged => "subscriptions-changed",
            EventName::UserStatus => "user-status",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventName> for u8 {
    fn from(name: EventName) -> u8 {
        name as u8
    }
}

impl TryFrom<u8> for EventName {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(EventName::RoomMessages),
            0x02 => Ok(EventName::DeleteMessage),
            0x03 => Ok(EventName::DeleteMessageBulk),
            0x04 => Ok(EventName::UserMessage),
            0x05 => Ok(EventName::SubscriptionsChanged),
            0x06 => Ok(EventName::UserStatus),
            _ => Err("Invalid event name"),
        }
    }
}

/// Scope a frame is published on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Events for one room, keyed by room id.
    Room(String),
    /// Events for one user, keyed by user id.
    User(String),
    /// Events every client receives.
    Global,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Room(id) => write!(f, "room:{id}"),
            Topic::User(id) => write!(f, "user:{id}"),
            Topic::Global => f.write_str("global"),
        }
    }
}

/// Subscription change actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Inserted,
    Updated,
    Removed,
}

/// A stream frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// A message was posted or edited in a room.
    #[serde(rename = "room-message")]
    RoomMessage {
        /// The message.
        message: Message,
    },

    /// A single message was deleted.
    #[serde(rename = "delete-message")]
    DeleteMessage {
        /// Room the message belonged to.
        room_id: String,
        /// Deleted message id.
        id: String,
    },

    /// Messages were pruned in bulk.
    #[serde(rename = "delete-message-bulk")]
    DeleteMessageBulk(BulkDelete),

    /// A private system message for a user.
    #[serde(rename = "user-message")]
    UserMessage {
        /// Recipient user id.
        user_id: String,
        /// The message.
        message: Message,
    },

    /// One of the user's subscriptions changed.
    #[serde(rename = "subscriptions-changed")]
    SubscriptionsChanged {
        /// Owner of the subscription.
        user_id: String,
        /// What happened to it.
        action: SubscriptionAction,
        /// Subscription state after the change.
        subscription: Subscription,
    },

    /// A user's online status changed.
    #[serde(rename = "user-status")]
    UserStatus {
        /// The user.
        user: User,
        /// Status name (`online`, `away`, `busy`, `offline`).
        status: String,
        /// UTC offset in hours.
        utc_offset: f64,
    },
}

impl Frame {
    /// Get the event name this frame is delivered under.
    #[must_use]
    pub fn event_name(&self) -> EventName {
        match self {
            Frame::RoomMessage { .. } => EventName::RoomMessages,
            Frame::DeleteMessage { .. } => EventName::DeleteMessage,
            Frame::DeleteMessageBulk(_) => EventName::DeleteMessageBulk,
            Frame::UserMessage { .. } => EventName::UserMessage,
            Frame::SubscriptionsChanged { .. } => EventName::SubscriptionsChanged,
            Frame::UserStatus { .. } => EventName::UserStatus,
        }
    }

    /// Get the topic this frame is published on.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Frame::RoomMessage { message } => Topic::Room(message.room_id.clone()),
            Frame::DeleteMessage { room_id, .. } => Topic::Room(room_id.clone()),
            Frame::DeleteMessageBulk(delete) => Topic::Room(delete.room_id.clone()),
            Frame::UserMessage { user_id, .. } => Topic::User(user_id.clone()),
            Frame::SubscriptionsChanged { user_id, .. } => Topic::User(user_id.clone()),
            Frame::UserStatus { .. } => Topic::Global,
        }
    }

    /// Create a new RoomMessage frame.
    #[must_use]
    pub fn room_message(message: Message) -> Self {
        Frame::RoomMessage { message }
    }

    /// Create a new DeleteMessage frame.
    #[must_use]
    pub fn delete_message(room_id: impl Into<String>, id: impl Into<String>) -> Self {
        Frame::DeleteMessage {
            room_id: room_id.into(),
            id: id.into(),
        }
    }

    /// Create a new DeleteMessageBulk frame.
    #[must_use]
    pub fn delete_bulk(delete: BulkDelete) -> Self {
        Frame::DeleteMessageBulk(delete)
    }

    /// Create a new UserMessage frame.
    #[must_use]
    pub fn user_message(user_id: impl Into<String>, message: Message) -> Self {
        Frame::UserMessage {
            user_id: user_id.into(),
            message,
        }
    }

    /// Create a new SubscriptionsChanged frame.
    #[must_use]
    pub fn subscriptions_changed(
        user_id: impl Into<String>,
        action: SubscriptionAction,
        subscription: Subscription,
    ) -> Self {
        Frame::SubscriptionsChanged {
            user_id: user_id.into(),
            action,
            subscription,
        }
    }

    /// Create a new UserStatus frame.
    #[must_use]
    pub fn user_status(user: User, status: impl Into<String>, utc_offset: f64) -> Self {
        Frame::UserStatus {
            user,
            status: status.into(),
            utc_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_routing() {
        let msg = Message::new("m1", "r1", User::new("u1", "alice"), "hi");
        let frame = Frame::room_message(msg);
        assert_eq!(frame.event_name(), EventName::RoomMessages);
        assert_eq!(frame.topic(), Topic::Room("r1".into()));

        let bulk = Frame::delete_bulk(BulkDelete::new("r2", 5));
        assert_eq!(bulk.event_name(), EventName::DeleteMessageBulk);
        assert_eq!(bulk.topic(), Topic::Room("r2".into()));

        let changed = Frame::subscriptions_changed(
            "u1",
            SubscriptionAction::Updated,
            Subscription::new("r1"),
        );
        assert_eq!(changed.topic(), Topic::User("u1".into()));
    }

    #[test]
    fn test_event_name_conversion() {
        assert_eq!(EventName::try_from(0x01), Ok(EventName::RoomMessages));
        assert_eq!(EventName::try_from(0x06), Ok(EventName::UserStatus));
        assert!(EventName::try_from(0x07).is_err());
        assert_eq!(EventName::DeleteMessageBulk.to_string(), "deleteMessageBulk");
    }

    #[test]
    fn test_frame_json_tag() {
        let frame = Frame::delete_message("r1", "m1");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "delete-message");
        assert_eq!(json["room_id"], "r1");
    }
}
