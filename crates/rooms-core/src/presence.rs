//! Presence tracking.
//!
//! Holds the set of users currently online, keyed by username. Status
//! notifications arrive from the global stream; a user reported `offline`
//! is removed, any other status upserts the user.

use rooms_protocol::User;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::debug;

/// Status that removes a user from the online set.
pub const OFFLINE: &str = "offline";

/// An online user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPresence {
    /// User id.
    pub id: String,
    /// Username.
    pub username: String,
    /// Reported status (`online`, `away`, `busy`, ...).
    pub status: String,
    /// UTC offset in hours.
    pub utc_offset: f64,
}

/// Online users collection.
///
/// Readers may hold a [`watch::Receiver`] and are woken on every change.
#[derive(Debug)]
pub struct PresenceTracker {
    online: watch::Sender<HashMap<String, UserPresence>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        let (online, _) = watch::channel(HashMap::new());
        Self { online }
    }

    /// Apply a status notification.
    ///
    /// Returns `true` if the online set changed.
    pub fn update_user_status(&self, user: &User, status: &str, utc_offset: f64) -> bool {
        if status == OFFLINE {
            return self.online.send_if_modified(|online| {
                let left = online.remove(&user.username).is_some();
                if left {
                    debug!(user = %user.username, "Presence: user went offline");
                }
                left
            });
        }

        let presence = UserPresence {
            id: user.id.clone(),
            username: user.username.clone(),
            status: status.to_string(),
            utc_offset,
        };
        self.online.send_if_modified(|online| {
            if online.get(&user.username) == Some(&presence) {
                return false;
            }
            if online.insert(user.username.clone(), presence).is_none() {
                debug!(user = %user.username, status, "Presence: user came online");
            }
            true
        })
    }

    /// Presence of one user, if online.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<UserPresence> {
        self.online.borrow().get(username).cloned()
    }

    /// Check if a user is online.
    #[must_use]
    pub fn is_online(&self, username: &str) -> bool {
        self.online.borrow().contains_key(username)
    }

    /// Every online user, sorted by username.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserPresence> {
        let mut users: Vec<_> = self.online.borrow().values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Watch the online set.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HashMap<String, UserPresence>> {
        self.online.subscribe()
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.online.borrow().len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.online.borrow().is_empty()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
