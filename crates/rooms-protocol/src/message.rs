//! Message records carried by the stream.
//!
//! A [`Message`] is both the wire payload of a room event and the record kept
//! in the client's local message store.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Message kind for slash-command echoes, which are never stored locally.
pub const COMMAND_KIND: &str = "command";

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A user reference (message sender or the current identity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: String,
    /// Login name.
    pub username: String,
}

impl User {
    /// Create a new user reference.
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

/// Room type and name a message was received through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTag {
    /// Room type discriminator (`c`, `p`, `d`, ...).
    pub kind: char,
    /// Room name as used in the session key.
    pub name: String,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: String,
    /// Room the message belongs to.
    pub room_id: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub ts: u64,
    /// Author.
    pub sender: User,
    /// Message body.
    #[serde(default)]
    pub text: String,
    /// System message kind; `None` for regular user messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Pinned messages survive bulk deletes that exclude pins.
    #[serde(default)]
    pub pinned: bool,
    /// Parent message id when this is a thread reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Set on locally created messages not yet acknowledged by the server.
    #[serde(default)]
    pub pending: bool,
    /// Display name of the room, filled in on delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Room the message was received through, filled in on delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomTag>,
    /// Re-render marker bumped when a neighbouring message disappears.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
    /// Sender is on the subscription's ignore list.
    #[serde(default)]
    pub ignored: bool,
    /// Private system message addressed to the current user only.
    #[serde(default)]
    pub private: bool,
}

impl Message {
    /// Create a new message stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        room_id: impl Into<String>,
        sender: User,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            room_id: room_id.into(),
            ts: now_millis(),
            sender,
            text: text.into(),
            kind: None,
            pinned: false,
            thread_id: None,
            pending: false,
            name: None,
            room: None,
            tick: None,
            ignored: false,
            private: false,
        }
    }

    /// Set the creation timestamp.
    #[must_use]
    pub fn with_ts(mut self, ts: u64) -> Self {
        self.ts = ts;
        self
    }

    /// Set the system message kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Mark the message as a reply in the given thread.
    #[must_use]
    pub fn in_thread(mut self, parent_id: impl Into<String>) -> Self {
        self.thread_id = Some(parent_id.into());
        self
    }

    /// Mark the message as pinned.
    #[must_use]
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Mark the message as a pending local echo.
    #[must_use]
    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    /// Whether this is a slash-command echo.
    #[must_use]
    pub fn is_command(&self) -> bool {
        self.kind.as_deref() == Some(COMMAND_KIND)
    }

    /// Whether this is a thread reply.
    #[must_use]
    pub fn is_thread_reply(&self) -> bool {
        self.thread_id.is_some()
    }
}

/// Bulk deletion notice for a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDelete {
    /// Room to prune.
    pub room_id: String,
    /// Messages at or before this timestamp are removed.
    pub before_ts: u64,
    /// Spare pinned messages.
    #[serde(default)]
    pub exclude_pinned: bool,
    /// Spare thread replies.
    #[serde(default)]
    pub ignore_threads: bool,
    /// Only remove messages from these usernames; empty means everyone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
}

impl BulkDelete {
    /// Create a bulk delete for everything up to `before_ts`.
    #[must_use]
    pub fn new(room_id: impl Into<String>, before_ts: u64) -> Self {
        Self {
            room_id: room_id.into(),
            before_ts,
            exclude_pinned: false,
            ignore_threads: false,
            users: Vec::new(),
        }
    }

    /// Spare pinned messages.
    #[must_use]
    pub fn exclude_pinned(mut self) -> Self {
        self.exclude_pinned = true;
        self
    }

    /// Spare thread replies.
    #[must_use]
    pub fn ignore_threads(mut self) -> Self {
        self.ignore_threads = true;
        self
    }

    /// Restrict the delete to the given senders.
    #[must_use]
    pub fn from_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether a message falls under this delete.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        if message.room_id != self.room_id || message.ts > self.before_ts {
            return false;
        }
        if self.exclude_pinned && message.pinned {
            return false;
        }
        if self.ignore_threads && message.is_thread_reply() {
            return false;
        }
        self.users.is_empty() || self.users.contains(&message.sender.username)
    }
}

/// The current user's subscription to a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscribed room.
    pub room_id: String,
    /// User ids whose messages are hidden in this room.
    #[serde(default)]
    pub ignored: Vec<String>,
}

impl Subscription {
    /// Create a subscription with an empty ignore list.
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ignored: Vec::new(),
        }
    }

    /// Check whether messages from a user are ignored.
    #[must_use]
    pub fn ignores(&self, user_id: &str) -> bool {
        self.ignored.iter().any(|id| id == user_id)
    }
}
