//! In-memory message store.

use crate::collab::MessageStore;
use dashmap::DashMap;
use rooms_protocol::{BulkDelete, Message, Subscription};
use tracing::trace;

/// Message store keyed by message id.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: DashMap<String, Message>,
}

impl MemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a message by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Message> {
        self.messages.get(id).map(|entry| entry.clone())
    }

    /// Messages of a room, oldest first.
    #[must_use]
    pub fn messages_in(&self, room_id: &str) -> Vec<Message> {
        let mut messages: Vec<_> = self
            .messages
            .iter()
            .filter(|entry| entry.room_id == room_id)
            .map(|entry| entry.clone())
            .collect();
        messages.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
        messages
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl MessageStore for MemoryMessageStore {
    fn upsert(&self, mut message: Message, subscription: Option<&Subscription>) {
        if !message.is_command() {
            message.ignored = subscription.is_some_and(|s| s.ignores(&message.sender.id));
        }
        trace!(message = %message.id, room = %message.room_id, "Upserting message");
        self.messages.insert(message.id.clone(), message);
    }

    fn remove_by_id(&self, id: &str) -> Option<Message> {
        self.messages.remove(id).map(|(_, message)| message)
    }

    fn remove_matching(&self, filter: &BulkDelete) -> Vec<Message> {
        let ids: Vec<String> = self
            .messages
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter_map(|id| self.remove_by_id(id)).collect()
    }

    fn find_latest_non_pending(&self, room_id: &str) -> Option<Message> {
        self.messages
            .iter()
            .filter(|entry| entry.room_id == room_id && !entry.pending)
            .max_by_key(|entry| entry.ts)
            .map(|entry| entry.clone())
    }

    fn touch_neighbors(&self, room_id: &str, ts: u64, tick: u64) {
        let mut before: Option<(u64, String)> = None;
        let mut after: Option<(u64, String)> = None;
        for entry in self.messages.iter().filter(|e| e.room_id == room_id) {
            if entry.ts < ts && before.as_ref().map_or(true, |(t, _)| entry.ts > *t) {
                before = Some((entry.ts, entry.key().clone()));
            }
            if entry.ts > ts && after.as_ref().map_or(true, |(t, _)| entry.ts < *t) {
                after = Some((entry.ts, entry.key().clone()));
            }
        }
        for (_, id) in before.into_iter().chain(after) {
            if let Some(mut message) = self.messages.get_mut(&id) {
                message.tick = Some(tick);
            }
        }
    }

    fn apply_ignored(&self, room_id: &str, ignored: &[String]) {
        for mut entry in self.messages.iter_mut() {
            if entry.room_id == room_id && !entry.is_command() {
                entry.ignored = ignored.contains(&entry.sender.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rooms_protocol::User;

    fn msg(id: &str, room: &str, ts: u64) -> Message {
        Message::new(id, room, User::new("u1", "alice"), "text").with_ts(ts)
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let store = MemoryMessageStore::new();
        store.upsert(msg("m1", "GENERAL", 1), None);
        store.upsert(msg("m1", "GENERAL", 2), None);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("m1").unwrap().ts, 2);
    }

    #[test]
    fn test_upsert_applies_ignore_list() {
        let store = MemoryMessageStore::new();
        let mut sub = Subscription::new("GENERAL");
        sub.ignored.push("u1".into());

        store.upsert(msg("m1", "GENERAL", 1), Some(&sub));
        store.upsert(msg("m2", "GENERAL", 2).with_kind("command"), Some(&sub));

        assert!(store.get("m1").unwrap().ignored);
        assert!(!store.get("m2").unwrap().ignored);
    }

    #[test]
    fn test_latest_non_pending() {
        let store = MemoryMessageStore::new();
        store.upsert(msg("m1", "GENERAL", 10), None);
        store.upsert(msg("m2", "GENERAL", 20), None);
        store.upsert(msg("m3", "GENERAL", 30).pending(), None);
        store.upsert(msg("m4", "RANDOM", 40), None);

        assert_eq!(store.find_latest_non_pending("GENERAL").unwrap().id, "m2");
        assert!(store.find_latest_non_pending("EMPTY").is_none());
    }

    #[test]
    fn test_touch_neighbors_stays_in_room() {
        let store = MemoryMessageStore::new();
        store.upsert(msg("a", "GENERAL", 10), None);
        store.upsert(msg("b", "GENERAL", 15), None);
        store.upsert(msg("c", "GENERAL", 30), None);
        store.upsert(msg("x", "RANDOM", 19), None);

        store.touch_neighbors("GENERAL", 20, 99);

        assert_eq!(store.get("b").unwrap().tick, Some(99));
        assert_eq!(store.get("c").unwrap().tick, Some(99));
        assert_eq!(store.get("a").unwrap().tick, None);
        assert_eq!(store.get("x").unwrap().tick, None);
    }

    #[test]
    fn test_remove_matching() {
        let store = MemoryMessageStore::new();
        store.upsert(msg("a", "GENERAL", 10), None);
        store.upsert(msg("b", "GENERAL", 30), None);
        store.upsert(msg("c", "RANDOM", 10), None);

        let removed = store.remove_matching(&BulkDelete::new("GENERAL", 20));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "a");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_apply_ignored() {
        let store = MemoryMessageStore::new();
        store.upsert(msg("a", "GENERAL", 10), None);
        store.upsert(msg("b", "RANDOM", 10), None);

        store.apply_ignored("GENERAL", &["u1".to_string()]);
        assert!(store.get("a").unwrap().ignored);
        assert!(!store.get("b").unwrap().ignored);

        store.apply_ignored("GENERAL", &[]);
        assert!(!store.get("a").unwrap().ignored);
    }
}
