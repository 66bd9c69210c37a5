//! In-memory collaborators.
//!
//! Used by the simulation binary and the test suites. Each keeps enough
//! bookkeeping to assert on what the manager did to it.

use crate::collab::{
    CallbackBus, HistoryBuffer, HookChain, RenderHandle, Renderer, Room, RoomDirectory,
    SubscriptionStore,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use rooms_protocol::{Message, Subscription, User};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Room directory backed by a map of `(kind, name)` to room.
#[derive(Debug, Default)]
pub struct LocalDirectory {
    rooms: DashMap<(char, String), Room>,
}

impl LocalDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a room resolvable.
    pub fn insert(&self, room: Room) {
        self.rooms.insert((room.kind, room.name.clone()), room);
    }

    /// Make a room unresolvable again.
    pub fn remove(&self, kind: char, name: &str) -> Option<Room> {
        self.rooms
            .remove(&(kind, name.to_string()))
            .map(|(_, room)| room)
    }
}

impl RoomDirectory for LocalDirectory {
    fn resolve(&self, kind: char, name: &str, _user: Option<&User>) -> Option<Room> {
        self.rooms
            .get(&(kind, name.to_string()))
            .map(|entry| entry.clone())
    }
}

/// History paging state per room.
#[derive(Debug, Default)]
pub struct LocalHistory {
    behind: DashSet<String>,
    backfills: DashMap<String, usize>,
    cleared: Mutex<Vec<String>>,
}

impl LocalHistory {
    /// Create a history with every room caught up.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a room as having newer history left to load.
    pub fn set_has_more_in_future(&self, room_id: &str, behind: bool) {
        if behind {
            self.behind.insert(room_id.to_string());
        } else {
            self.behind.remove(room_id);
        }
    }

    /// How many times the room was backfilled.
    #[must_use]
    pub fn backfill_count(&self, room_id: &str) -> usize {
        self.backfills.get(room_id).map_or(0, |count| *count)
    }

    /// Rooms cleared so far, in order.
    #[must_use]
    pub fn cleared(&self) -> Vec<String> {
        lock(&self.cleared).clone()
    }
}

impl HistoryBuffer for LocalHistory {
    fn has_more_in_future(&self, room_id: &str) -> bool {
        self.behind.contains(room_id)
    }

    fn backfill_if_empty(&self, room_id: &str) {
        *self.backfills.entry(room_id.to_string()).or_insert(0) += 1;
    }

    fn clear(&self, room_id: &str) {
        self.behind.remove(room_id);
        lock(&self.cleared).push(room_id.to_string());
    }
}

/// Subscriptions keyed by room id.
#[derive(Debug, Default)]
pub struct LocalSubscriptions {
    subscriptions: DashMap<String, Subscription>,
}

impl LocalSubscriptions {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a subscription.
    pub fn insert(&self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.room_id.clone(), subscription);
    }
}

impl SubscriptionStore for LocalSubscriptions {
    fn find_by_room_id(&self, room_id: &str) -> Option<Subscription> {
        self.subscriptions.get(room_id).map(|entry| entry.clone())
    }
}

/// Hook chain that passes messages through unchanged.
///
/// Individual message ids can be vetoed and every run can be delayed.
#[derive(Debug, Default)]
pub struct PassThroughHooks {
    vetoed: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    runs: AtomicU64,
}

impl PassThroughHooks {
    /// Create a chain that passes everything immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the message with this id.
    pub fn veto(&self, id: &str) {
        lock(&self.vetoed).insert(id.to_string());
    }

    /// Sleep this long before every result.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Number of messages run through the chain.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HookChain for PassThroughHooks {
    async fn run(&self, hook: &str, message: Message) -> Option<Message> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.vetoed).contains(&message.id) {
            trace!(hook, message = %message.id, "Hook vetoed message");
            return None;
        }
        Some(message)
    }
}

/// Renderer that hands out numbered handles.
#[derive(Debug, Default)]
pub struct LocalRenderer {
    next: AtomicU64,
    live: DashSet<RenderHandle>,
    mention_updates: DashMap<RenderHandle, usize>,
}

impl LocalRenderer {
    /// Create a renderer with no surfaces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a handle was created and not yet destroyed.
    #[must_use]
    pub fn is_live(&self, handle: RenderHandle) -> bool {
        self.live.contains(&handle)
    }

    /// Number of live surfaces.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of mention refreshes a surface received.
    #[must_use]
    pub fn mention_updates(&self, handle: RenderHandle) -> usize {
        self.mention_updates.get(&handle).map_or(0, |count| *count)
    }
}

impl Renderer for LocalRenderer {
    fn create_handle(&self, room_id: &str) -> RenderHandle {
        let handle = RenderHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.live.insert(handle);
        trace!(room = %room_id, %handle, "Render handle created");
        handle
    }

    fn destroy_handle(&self, handle: RenderHandle) {
        self.live.remove(&handle);
        trace!(%handle, "Render handle destroyed");
    }

    fn update_mention_marks(&self, handle: RenderHandle) {
        *self.mention_updates.entry(handle).or_insert(0) += 1;
    }
}

/// Bus that records every callback and event, in order.
#[derive(Debug, Default)]
pub struct RecordingBus {
    events: Mutex<Vec<(String, Message)>>,
}

impl RecordingBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Message)> {
        lock(&self.events).clone()
    }

    /// How many times a callback or event name was recorded.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        lock(&self.events).iter().filter(|(n, _)| n == name).count()
    }
}

impl CallbackBus for RecordingBus {
    fn run(&self, event: &str, message: &Message) {
        lock(&self.events).push((event.to_string(), message.clone()));
    }

    fn emit_global_event(&self, name: &str, message: &Message) {
        lock(&self.events).push((name.to_string(), message.clone()));
    }
}
