//! Session registry and LRU eviction policy.
//!
//! The registry is the single owner of session records. Other components
//! read snapshots and mutate through the registry's operations; no mutable
//! reference to a session escapes it.

use crate::collab::RenderHandle;
use crate::session::{Session, SessionKey, SessionSnapshot};
use dashmap::DashMap;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::trace;

/// Result of touching a session on `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Touched {
    /// The session did not exist and was created.
    pub created: bool,
    /// The session was already ready before this touch.
    pub was_ready: bool,
}

/// Registry of open sessions, keyed by session key.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Session>,
    /// Source of `seen_seq` values.
    clock: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Create the session if missing and bump its `last_seen_at`.
    pub fn touch(&self, key: &SessionKey) -> Touched {
        let seq = self.tick();
        let mut created = false;
        let mut entry = self.sessions.entry(key.clone()).or_insert_with(|| {
            created = true;
            Session::new(key.clone(), seq)
        });
        let was_ready = entry.ready;
        entry.touch(seq);
        Touched { created, was_ready }
    }

    /// Mark a session active.
    ///
    /// Returns `true` if the flag changed.
    pub fn activate(&self, key: &SessionKey) -> bool {
        self.with_session_mut(key, |session| {
            let changed = !session.active;
            session.active = true;
            changed
        })
        .unwrap_or(false)
    }

    /// Remove a session, resetting its flags on the way out.
    pub(crate) fn remove(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.remove(key).map(|(_, mut session)| {
            session.active = false;
            session.ready = false;
            session
        })
    }

    /// Run `f` against a session under its shard lock.
    ///
    /// `f` must not call back into the registry.
    pub(crate) fn with_session_mut<R>(
        &self,
        key: &SessionKey,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        self.sessions.get_mut(key).map(|mut entry| f(&mut entry))
    }

    /// Keys of sessions that are active but not yet ready.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<SessionKey> {
        self.sessions
            .iter()
            .filter(|entry| entry.active && !entry.ready)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Active sessions with a resolved room id, as `(key, room_id)` pairs.
    #[must_use]
    pub fn active_rooms(&self) -> Vec<(SessionKey, String)> {
        self.sessions
            .iter()
            .filter(|entry| entry.active)
            .filter_map(|entry| {
                entry
                    .room_id
                    .clone()
                    .map(|room_id| (entry.key().clone(), room_id))
            })
            .collect()
    }

    /// Sessions that must be closed to get back down to `capacity`, least
    /// recently seen last in recency order.
    ///
    /// Sessions are ranked by `last_seen_at` descending; the first `capacity`
    /// are kept and the rest returned.
    #[must_use]
    pub fn eviction_candidates(&self, capacity: usize) -> Vec<SessionKey> {
        if self.sessions.len() <= capacity {
            return Vec::new();
        }

        let mut ranked: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (entry.recency(), entry.key().clone()))
            .collect();
        ranked.sort_by_key(|(recency, _)| Reverse(*recency));

        let evicted: Vec<SessionKey> = ranked
            .into_iter()
            .skip(capacity)
            .map(|(_, key)| key)
            .collect();
        trace!(capacity, evicted = evicted.len(), "Computed eviction candidates");
        evicted
    }

    /// Check if a session is ready. Unknown keys are not ready.
    #[must_use]
    pub fn is_ready(&self, key: &SessionKey) -> bool {
        self.sessions.get(key).is_some_and(|entry| entry.ready)
    }

    /// Check if a session exists.
    #[must_use]
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn snapshot(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        self.sessions.get(key).map(|entry| entry.snapshot())
    }

    /// Snapshots of every session, most recently seen first.
    #[must_use]
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut ranked: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (entry.recency(), entry.snapshot()))
            .collect();
        ranked.sort_by_key(|(recency, _)| Reverse(*recency));
        ranked.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Session whose resolved room id matches.
    #[must_use]
    pub fn find_by_room_id(&self, room_id: &str) -> Option<SessionSnapshot> {
        self.sessions
            .iter()
            .find(|entry| entry.room_id.as_deref() == Some(room_id))
            .map(|entry| entry.snapshot())
    }

    /// Another session than `except` with the room's stream attached.
    #[must_use]
    pub fn attached_elsewhere(&self, room_id: &str, except: &SessionKey) -> Option<SessionKey> {
        self.sessions
            .iter()
            .find(|entry| {
                entry.key() != except
                    && entry.stream_attached
                    && entry.room_id.as_deref() == Some(room_id)
            })
            .map(|entry| entry.key().clone())
    }

    /// Render handle of a session: `None` for unknown keys, `Some(None)` if
    /// the session has no handle yet.
    #[must_use]
    pub fn render_handle(&self, key: &SessionKey) -> Option<Option<RenderHandle>> {
        self.sessions.get(key).map(|entry| entry.render_handle)
    }

    /// Store a render handle unless the session already has one.
    ///
    /// Returns `false` if the session is gone or already had a handle.
    pub(crate) fn set_render_handle(&self, key: &SessionKey, handle: RenderHandle) -> bool {
        self.with_session_mut(key, |session| {
            if session.render_handle.is_some() {
                return false;
            }
            session.render_handle = Some(handle);
            true
        })
        .unwrap_or(false)
    }

    /// Receiver for a session's unread marker.
    #[must_use]
    pub fn unread_marker(&self, key: &SessionKey) -> Option<watch::Receiver<Option<u64>>> {
        self.sessions
            .get(key)
            .map(|entry| entry.unread_marker.subscribe())
    }

    /// Set a session's unread marker.
    ///
    /// Returns `false` for unknown keys.
    pub fn set_unread_marker(&self, key: &SessionKey, marker: Option<u64>) -> bool {
        self.with_session_mut(key, |session| {
            session.unread_marker.send_replace(marker);
        })
        .is_some()
    }

    /// All session keys.
    #[must_use]
    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
