//! Session keys and session records.
//!
//! A session is the live state for one opened room. It is keyed by the room
//! type discriminator followed by the room name (`cgeneral`, `dalice`).

use crate::collab::RenderHandle;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

/// Session key errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The key was empty.
    #[error("Session key cannot be empty")]
    Empty,

    /// The key carried a type discriminator but no room name.
    #[error("Session key '{0}' has no room name")]
    MissingName(char),
}

/// Identity of a session: room type discriminator plus room name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    /// Build a key from a type discriminator and a room name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty.
    pub fn new(kind: char, name: &str) -> Result<Self, KeyError> {
        if name.is_empty() {
            return Err(KeyError::MissingName(kind));
        }
        let mut key = String::with_capacity(kind.len_utf8() + name.len());
        key.push(kind);
        key.push_str(name);
        Ok(Self(key))
    }

    /// Parse a combined key such as `cgeneral`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or has no room name.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(KeyError::Empty)?;
        Self::new(kind, chars.as_str())
    }

    /// Room type discriminator.
    #[must_use]
    pub fn kind(&self) -> char {
        self.0.chars().next().unwrap_or_default()
    }

    /// Room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0[self.kind().len_utf8()..]
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for SessionKey {
    type Error = KeyError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

/// Session record, owned by the registry.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) key: SessionKey,
    pub(crate) room_id: Option<String>,
    pub(crate) active: bool,
    pub(crate) ready: bool,
    pub(crate) stream_attached: bool,
    pub(crate) last_seen_at: Instant,
    /// Tie-breaker for `last_seen_at`, strictly increasing across touches.
    pub(crate) seen_seq: u64,
    pub(crate) unread_marker: watch::Sender<Option<u64>>,
    pub(crate) render_handle: Option<RenderHandle>,
}

impl Session {
    pub(crate) fn new(key: SessionKey, seen_seq: u64) -> Self {
        let (unread_marker, _) = watch::channel(None);
        Self {
            key,
            room_id: None,
            active: false,
            ready: false,
            stream_attached: false,
            last_seen_at: Instant::now(),
            seen_seq,
            unread_marker,
            render_handle: None,
        }
    }

    pub(crate) fn touch(&mut self, seen_seq: u64) {
        self.last_seen_at = Instant::now();
        self.seen_seq = seen_seq;
    }

    /// Eviction sort key; larger is more recent.
    pub(crate) fn recency(&self) -> (Instant, u64) {
        (self.last_seen_at, self.seen_seq)
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            room_id: self.room_id.clone(),
            active: self.active,
            ready: self.ready,
            stream_attached: self.stream_attached,
            last_seen_at: self.last_seen_at,
            render_handle: self.render_handle,
        }
    }
}

/// Read-only copy of a session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session key.
    pub key: SessionKey,
    /// Resolved room id, once the room was found.
    pub room_id: Option<String>,
    /// Requested to be live.
    pub active: bool,
    /// Room resolved and stream attached.
    pub ready: bool,
    /// The room's stream listeners are registered.
    pub stream_attached: bool,
    /// Last time the session was opened.
    pub last_seen_at: Instant,
    /// Render handle, if one was created.
    pub render_handle: Option<RenderHandle>,
}
