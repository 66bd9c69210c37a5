//! Contracts for the collaborators the session manager drives.
//!
//! Rendering, persistence, the room directory and the transport live outside
//! this crate. The manager only talks to them through these traits, held as
//! `Arc<dyn _>` in [`Collaborators`].

use async_trait::async_trait;
use rooms_protocol::{BulkDelete, Message, Subscription, User};
use std::fmt;
use std::sync::Arc;
use tenvis_rooms_transport::Transport;

/// Inbound hook run on every message received from the stream or resync.
pub const CLIENT_MESSAGE_RECEIVED: &str = "onClientMessageReceived";

/// Extension callback run after a streamed message was merged.
pub const STREAM_MESSAGE: &str = "streamMessage";

/// Global event emitted for every delivered message.
pub const NEW_MESSAGE_EVENT: &str = "new-message";

/// A resolved room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Room id.
    pub id: String,
    /// Room type discriminator.
    pub kind: char,
    /// Display name.
    pub name: String,
}

impl Room {
    /// Create a new room.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: char, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
        }
    }
}

/// Opaque handle to a room's visual surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderHandle(pub u64);

impl fmt::Display for RenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "render_{}", self.0)
    }
}

/// Looks rooms up by type and name.
pub trait RoomDirectory: Send + Sync {
    /// Resolve a room for the current user; `None` if it is not known (yet).
    fn resolve(&self, kind: char, name: &str, user: Option<&User>) -> Option<Room>;
}

/// Per-room history paging state.
pub trait HistoryBuffer: Send + Sync {
    /// Whether newer history than what is loaded still has to be fetched.
    fn has_more_in_future(&self, room_id: &str) -> bool;

    /// Load the first page of history if nothing is loaded for the room.
    fn backfill_if_empty(&self, room_id: &str);

    /// Forget everything loaded for the room.
    fn clear(&self, room_id: &str);
}

/// Local message store.
pub trait MessageStore: Send + Sync {
    /// Insert or replace a message by id, applying the subscription's
    /// ignore list.
    fn upsert(&self, message: Message, subscription: Option<&Subscription>);

    /// Remove one message.
    fn remove_by_id(&self, id: &str) -> Option<Message>;

    /// Remove every message matching a bulk delete.
    fn remove_matching(&self, filter: &BulkDelete) -> Vec<Message>;

    /// Most recent message of the room that is not a pending local echo.
    fn find_latest_non_pending(&self, room_id: &str) -> Option<Message>;

    /// Set `tick` on the closest earlier and closest later message of the
    /// room around `ts`.
    fn touch_neighbors(&self, room_id: &str, ts: u64, tick: u64);

    /// Recompute `ignored` flags for a room from a subscription's ignore list.
    fn apply_ignored(&self, room_id: &str, ignored: &[String]);
}

/// The current user's subscriptions.
pub trait SubscriptionStore: Send + Sync {
    /// Subscription record for a room.
    fn find_by_room_id(&self, room_id: &str) -> Option<Subscription>;
}

/// Chain of async message transforms.
#[async_trait]
pub trait HookChain: Send + Sync {
    /// Run the named hook; `None` vetoes the message.
    async fn run(&self, hook: &str, message: Message) -> Option<Message>;
}

/// Owner of room surfaces.
pub trait Renderer: Send + Sync {
    /// Create the surface for a room.
    fn create_handle(&self, room_id: &str) -> RenderHandle;

    /// Tear a surface down.
    fn destroy_handle(&self, handle: RenderHandle);

    /// Refresh mention markers on a surface.
    fn update_mention_marks(&self, handle: RenderHandle);
}

/// Extension callbacks and platform events.
pub trait CallbackBus: Send + Sync {
    /// Run the named extension callback.
    fn run(&self, event: &str, message: &Message);

    /// Emit a platform-level event.
    fn emit_global_event(&self, name: &str, message: &Message);
}

/// Everything the manager talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Room lookup by type and name.
    pub directory: Arc<dyn RoomDirectory>,
    /// History paging state.
    pub history: Arc<dyn HistoryBuffer>,
    /// Local message store.
    pub messages: Arc<dyn MessageStore>,
    /// The user's subscriptions.
    pub subscriptions: Arc<dyn SubscriptionStore>,
    /// Inbound message hooks.
    pub hooks: Arc<dyn HookChain>,
    /// Room surfaces.
    pub renderer: Arc<dyn Renderer>,
    /// Extension callbacks and global events.
    pub bus: Arc<dyn CallbackBus>,
    /// Stream subscriptions and missed-message requests.
    pub transport: Arc<dyn Transport>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}
