//! Message stream multiplexer.
//!
//! For every ready session the multiplexer holds three listeners on the
//! room's stream (messages, single deletes, bulk deletes) and, while a user
//! is logged in, two listeners on the user's own stream (private messages,
//! subscription changes).
//!
//! Inbound messages cross one async boundary: the inbound hook chain. Each
//! attachment has an owner slot; a merge holds it for reading and `detach`
//! empties it under the write lock, so nothing is merged for a room once
//! `detach` returns.

use crate::collab::{
    Collaborators, Room, CLIENT_MESSAGE_RECEIVED, NEW_MESSAGE_EVENT, STREAM_MESSAGE,
};
use crate::deferred::{DeferredQueue, DeferredTask};
use crate::metrics;
use crate::session::SessionKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rooms_protocol::{now_millis, EventName, Frame, Message, RoomTag, User};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tenvis_rooms_transport::{EventHandler, ListenerId};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Sender name forced onto private system messages.
pub const SYSTEM_USERNAME: &str = "rocket.cat";

const ROOM_EVENTS: [EventName; 3] = [
    EventName::RoomMessages,
    EventName::DeleteMessage,
    EventName::DeleteMessageBulk,
];

const USER_EVENTS: [EventName; 2] = [EventName::UserMessage, EventName::SubscriptionsChanged];

/// What a room attachment is for.
#[derive(Debug, Clone)]
pub struct AttachContext {
    /// Session that owns the attachment.
    pub key: SessionKey,
    /// The resolved room.
    pub room: Room,
}

/// Session a room attachment merges on behalf of. `None` once detached.
type Owner = Arc<RwLock<Option<SessionKey>>>;

/// Live listeners for one room.
#[derive(Debug)]
struct Attachment {
    owner: Owner,
    listeners: Vec<(EventName, ListenerId)>,
}

impl Attachment {
    fn owner(&self) -> Option<SessionKey> {
        self.owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Live listeners for the current user.
#[derive(Debug)]
struct UserFeeds {
    user_id: String,
    listeners: Vec<(EventName, ListenerId)>,
}

/// Count of hook-chain tasks still running.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(self.clone())
    }

    /// Number of messages currently inside the hook chain.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until no message is inside the hook chain.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            idle.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Run a message through the inbound hook chain.
///
/// Shared by live delivery and missed-message resync.
pub(crate) async fn transform(collab: &Collaborators, message: Message) -> Option<Message> {
    let id = message.id.clone();
    let transformed = collab.hooks.run(CLIENT_MESSAGE_RECEIVED, message).await;
    if transformed.is_none() {
        trace!(message = %id, "Message vetoed by inbound hooks");
        metrics::record_dropped("vetoed");
    }
    transformed
}

/// Handler state shared by the three listeners of one attachment.
struct RoomFeed {
    room_id: String,
    room_name: String,
    owner: Owner,
    collab: Collaborators,
    deferred: DeferredQueue,
    in_flight: Arc<InFlight>,
}

impl RoomFeed {
    fn is_current(&self) -> bool {
        self.owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn on_frame(self: &Arc<Self>, frame: Frame) {
        if let Frame::RoomMessage { message } = frame {
            if self.is_current() {
                self.spawn_receive(message);
            }
            return;
        }

        let owner = self.owner.read().unwrap_or_else(PoisonError::into_inner);
        if owner.is_none() {
            return;
        }
        match frame {
            Frame::DeleteMessage { id, .. } => {
                if let Some(removed) = self.collab.messages.remove_by_id(&id) {
                    debug!(room = %self.room_id, message = %id, "Message deleted");
                    metrics::record_deleted(1);
                    self.touch_neighbors(&[removed]);
                }
            }
            Frame::DeleteMessageBulk(delete) => {
                let removed = self.collab.messages.remove_matching(&delete);
                debug!(
                    room = %self.room_id,
                    before = delete.before_ts,
                    removed = removed.len(),
                    "Messages deleted in bulk"
                );
                metrics::record_deleted(removed.len());
                self.touch_neighbors(&removed);
            }
            other => {
                warn!(room = %self.room_id, event = %other.event_name(), "Unexpected frame on room feed");
            }
        }
    }

    fn touch_neighbors(&self, removed: &[Message]) {
        let tick = now_millis();
        for message in removed {
            self.collab
                .messages
                .touch_neighbors(&message.room_id, message.ts, tick);
        }
    }

    fn spawn_receive(self: &Arc<Self>, message: Message) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(room = %self.room_id, message = %message.id, "No runtime to process message");
            metrics::record_dropped("no_runtime");
            return;
        };
        let guard = self.in_flight.enter();
        let feed = self.clone();
        runtime.spawn(async move {
            let _guard = guard;
            feed.receive(message).await;
        });
    }

    async fn receive(&self, message: Message) {
        let Some(message) = transform(&self.collab, message).await else {
            return;
        };
        if !self.is_current() {
            self.drop_detached(&message);
            return;
        }
        self.merge(message);
    }

    fn drop_detached(&self, message: &Message) {
        debug!(room = %self.room_id, message = %message.id, "Dropping message for detached room");
        metrics::record_dropped("detached");
    }

    fn merge(&self, mut message: Message) {
        // Live messages wait until history has caught up with the present.
        if self.collab.history.has_more_in_future(&self.room_id) {
            trace!(room = %self.room_id, message = %message.id, "History behind, skipping delivery");
            metrics::record_dropped("history_behind");
            return;
        }
        let subscription = if message.is_command() {
            None
        } else {
            self.collab.subscriptions.find_by_room_id(&self.room_id)
        };

        // Held until the events are out; `detach` waits on it.
        let owner = self.owner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(key) = owner.as_ref() else {
            self.drop_detached(&message);
            return;
        };

        if !message.is_command() {
            message.room = Some(RoomTag {
                kind: key.kind(),
                name: key.name().to_string(),
            });
            self.collab
                .messages
                .upsert(message.clone(), subscription.as_ref());
        }
        message.name = Some(self.room_name.clone());

        self.deferred.push(DeferredTask::MentionMarks(key.clone()));

        self.collab.bus.run(STREAM_MESSAGE, &message);
        self.collab.bus.emit_global_event(NEW_MESSAGE_EVENT, &message);
        metrics::record_delivered();
        trace!(room = %self.room_id, message = %message.id, "Message delivered");
    }
}

/// Per-room and per-user stream subscriptions.
pub struct Multiplexer {
    collab: Collaborators,
    attachments: DashMap<String, Attachment>,
    user_feeds: Mutex<Option<UserFeeds>>,
    deferred: DeferredQueue,
    in_flight: Arc<InFlight>,
}

impl Multiplexer {
    /// Create a multiplexer with no attachments.
    #[must_use]
    pub fn new(collab: Collaborators, deferred: DeferredQueue) -> Self {
        Self {
            collab,
            attachments: DashMap::new(),
            user_feeds: Mutex::new(None),
            deferred,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Subscribe the room's message, delete and bulk-delete feeds.
    ///
    /// Returns `false` without subscribing if the room is already attached.
    pub fn attach(&self, ctx: AttachContext) -> bool {
        let room_id = ctx.room.id.clone();
        let owner: Owner = Arc::new(RwLock::new(Some(ctx.key.clone())));

        // Register before subscribing so the first frame already sees a
        // current attachment.
        match self.attachments.entry(room_id.clone()) {
            Entry::Occupied(existing) => {
                trace!(room = %room_id, owner = ?existing.get().owner(), "Room already attached");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(Attachment {
                    owner: owner.clone(),
                    listeners: Vec::with_capacity(ROOM_EVENTS.len()),
                });
            }
        }

        let feed = Arc::new(RoomFeed {
            room_id: room_id.clone(),
            room_name: ctx.room.name.clone(),
            owner: owner.clone(),
            collab: self.collab.clone(),
            deferred: self.deferred.clone(),
            in_flight: self.in_flight.clone(),
        });

        let listeners: Vec<_> = ROOM_EVENTS
            .iter()
            .map(|&event| {
                let feed = feed.clone();
                let handler: EventHandler = Arc::new(move |frame| feed.on_frame(frame));
                let id = self
                    .collab
                    .transport
                    .subscribe_room_event(&room_id, event, handler);
                (event, id)
            })
            .collect();

        match self.attachments.get_mut(&room_id) {
            Some(mut attachment) if Arc::ptr_eq(&attachment.owner, &owner) => {
                attachment.listeners = listeners;
            }
            // Detached while subscribing.
            _ => self.unsubscribe_room(&room_id, listeners),
        }
        metrics::record_attachment();
        debug!(room = %room_id, session = %ctx.key, "Stream attached");
        true
    }

    /// Unsubscribe every feed of the room. Safe to call for unattached rooms.
    ///
    /// Waits for a merge in progress for the room to finish, so it must not
    /// be called from a stream callback of that room. Returns `true` if the
    /// room was attached.
    pub fn detach(&self, room_id: &str) -> bool {
        let Some((_, attachment)) = self.attachments.remove(room_id) else {
            return false;
        };
        let owner = attachment
            .owner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.unsubscribe_room(room_id, attachment.listeners);
        debug!(room = %room_id, session = ?owner, "Stream detached");
        true
    }

    /// Give up `key`'s hold on the room's stream.
    ///
    /// The attachment moves to `successor` if there is one and is detached
    /// otherwise. Does nothing unless `key` owns the attachment; returns
    /// whether anything changed.
    pub fn release(
        &self,
        room_id: &str,
        key: &SessionKey,
        successor: Option<SessionKey>,
    ) -> bool {
        let Some(owner) = self.attachments.get(room_id).map(|a| a.owner.clone()) else {
            return false;
        };
        let mut current = owner.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref() != Some(key) {
            return false;
        }
        match successor {
            Some(next) => {
                debug!(room = %room_id, from = %key, to = %next, "Stream handed over");
                *current = Some(next);
            }
            None => {
                *current = None;
                drop(current);
                if let Some((_, attachment)) = self
                    .attachments
                    .remove_if(room_id, |_, a| Arc::ptr_eq(&a.owner, &owner))
                {
                    self.unsubscribe_room(room_id, attachment.listeners);
                }
                debug!(room = %room_id, session = %key, "Stream detached");
            }
        }
        true
    }

    /// Session the room's attachment merges for.
    #[must_use]
    pub fn owner(&self, room_id: &str) -> Option<SessionKey> {
        self.attachments.get(room_id).and_then(|a| a.owner())
    }

    /// Merge a message fetched after a reconnect.
    ///
    /// Returns `false` without merging if the room is no longer attached.
    pub(crate) fn merge_missed(&self, room_id: &str, message: Message) -> bool {
        let subscription = self.collab.subscriptions.find_by_room_id(room_id);
        let Some(owner) = self.attachments.get(room_id).map(|a| a.owner.clone()) else {
            return false;
        };
        let owner = owner.read().unwrap_or_else(PoisonError::into_inner);
        if owner.is_none() {
            return false;
        }
        self.collab.messages.upsert(message, subscription.as_ref());
        true
    }

    fn unsubscribe_room(&self, room_id: &str, listeners: Vec<(EventName, ListenerId)>) {
        for (event, listener) in listeners {
            self.collab
                .transport
                .unsubscribe_room_event(room_id, event, listener);
        }
    }

    /// Check whether a room's stream is attached.
    #[must_use]
    pub fn is_attached(&self, room_id: &str) -> bool {
        self.attachments.contains_key(room_id)
    }

    /// Number of attached rooms.
    #[must_use]
    pub fn attached_count(&self) -> usize {
        self.attachments.len()
    }

    /// Point the user feeds at `user_id`.
    ///
    /// Returns `false` if that user's feeds were already attached.
    pub fn attach_user(&self, user_id: &str) -> bool {
        let mut feeds = self
            .user_feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if feeds.as_ref().is_some_and(|f| f.user_id == user_id) {
            return false;
        }
        if let Some(previous) = feeds.take() {
            self.unsubscribe_user(previous);
        }

        let listeners = USER_EVENTS
            .iter()
            .map(|&event| {
                let collab = self.collab.clone();
                let handler: EventHandler = Arc::new(move |frame| on_user_frame(&collab, frame));
                let id = self
                    .collab
                    .transport
                    .subscribe_user_event(user_id, event, handler);
                (event, id)
            })
            .collect();

        debug!(user = %user_id, "User feeds attached");
        *feeds = Some(UserFeeds {
            user_id: user_id.to_string(),
            listeners,
        });
        true
    }

    /// Drop the user feeds. Returns `true` if they were attached.
    pub fn detach_user(&self) -> bool {
        let previous = self
            .user_feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match previous {
            Some(feeds) => {
                self.unsubscribe_user(feeds);
                true
            }
            None => false,
        }
    }

    fn unsubscribe_user(&self, feeds: UserFeeds) {
        for (event, listener) in feeds.listeners {
            self.collab
                .transport
                .unsubscribe_user_event(&feeds.user_id, event, listener);
        }
        debug!(user = %feeds.user_id, "User feeds detached");
    }

    /// Hook-chain task accounting.
    #[must_use]
    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }
}

fn on_user_frame(collab: &Collaborators, frame: Frame) {
    match frame {
        Frame::UserMessage { mut message, .. } => {
            message.sender = User::new("", SYSTEM_USERNAME);
            message.private = true;
            trace!(message = %message.id, "Private message stored");
            collab.messages.upsert(message, None);
        }
        Frame::SubscriptionsChanged { subscription, .. } => {
            trace!(room = %subscription.room_id, ignored = subscription.ignored.len(), "Subscription changed");
            collab
                .messages
                .apply_ignored(&subscription.room_id, &subscription.ignored);
        }
        other => {
            warn!(event = %other.event_name(), "Unexpected frame on user feed");
        }
    }
}
