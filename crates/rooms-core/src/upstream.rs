//! Upstream readiness signals.
//!
//! The host application owns the senders ([`UpstreamHandle`]); the manager
//! and its driver hold the receivers ([`Upstream`]).

use crate::reconciler::Signals;
use rooms_protocol::User;
use tokio::sync::watch;

/// Receiving side of the upstream signals.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub(crate) subscriptions_ready: watch::Receiver<bool>,
    pub(crate) rooms_ready: watch::Receiver<bool>,
    pub(crate) app_ready: watch::Receiver<bool>,
    pub(crate) user: watch::Receiver<Option<User>>,
}

impl Upstream {
    /// Create the signals, all false and logged out.
    #[must_use]
    pub fn channel() -> (UpstreamHandle, Self) {
        let (subscriptions_tx, subscriptions_ready) = watch::channel(false);
        let (rooms_tx, rooms_ready) = watch::channel(false);
        let (app_tx, app_ready) = watch::channel(false);
        let (user_tx, user) = watch::channel(None);
        (
            UpstreamHandle {
                subscriptions_ready: subscriptions_tx,
                rooms_ready: rooms_tx,
                app_ready: app_tx,
                user: user_tx,
            },
            Self {
                subscriptions_ready,
                rooms_ready,
                app_ready,
                user,
            },
        )
    }

    /// Whether the user's subscriptions are loaded.
    #[must_use]
    pub fn subscriptions_ready(&self) -> bool {
        *self.subscriptions_ready.borrow()
    }

    /// Current user, if logged in.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.user.borrow().clone()
    }

    /// Current values of the inputs the reconciler reads.
    #[must_use]
    pub fn signals(&self) -> Signals {
        Signals {
            rooms_ready: *self.rooms_ready.borrow(),
            app_ready: *self.app_ready.borrow(),
            user: self.user(),
        }
    }
}

/// Sending side of the upstream signals.
#[derive(Debug)]
pub struct UpstreamHandle {
    subscriptions_ready: watch::Sender<bool>,
    rooms_ready: watch::Sender<bool>,
    app_ready: watch::Sender<bool>,
    user: watch::Sender<Option<User>>,
}

impl UpstreamHandle {
    /// Set the subscriptions-ready signal.
    pub fn set_subscriptions_ready(&self, ready: bool) {
        self.subscriptions_ready.send_replace(ready);
    }

    /// Set the rooms-cache-ready signal.
    pub fn set_rooms_ready(&self, ready: bool) {
        self.rooms_ready.send_replace(ready);
    }

    /// Set the app-ready signal.
    pub fn set_app_ready(&self, ready: bool) {
        self.app_ready.send_replace(ready);
    }

    /// Raise every readiness signal.
    pub fn set_all_ready(&self) {
        self.set_subscriptions_ready(true);
        self.set_rooms_ready(true);
        self.set_app_ready(true);
    }

    /// Set the current user.
    pub fn login(&self, user: User) {
        self.user.send_replace(Some(user));
    }

    /// Clear the current user.
    pub fn logout(&self) {
        self.user.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_follow_handle() {
        let (handle, upstream) = Upstream::channel();
        assert_eq!(upstream.signals(), Signals::default());

        handle.set_all_ready();
        handle.login(User::new("u1", "alice"));
        let signals = upstream.signals();
        assert!(signals.rooms_ready && signals.app_ready);
        assert!(upstream.subscriptions_ready());
        assert_eq!(signals.user.unwrap().username, "alice");

        handle.logout();
        assert!(upstream.user().is_none());
    }
}
