//! Reactive plumbing: the shared readiness token, the reconciler scheduler
//! and the per-session ready handle.

use crate::registry::SessionRegistry;
use crate::session::SessionKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Shared dependency token.
///
/// Every change to any session's readiness bumps the token; every ready
/// handle watches it and re-reads its own session when it moves.
#[derive(Debug)]
pub struct Dependency {
    version: watch::Sender<u64>,
}

impl Dependency {
    /// Create a new token at version 0.
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { version }
    }

    /// Publish a change.
    pub fn changed(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Register a dependent.
    #[must_use]
    pub fn depend(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}

impl Default for Dependency {
    fn default() -> Self {
        Self::new()
    }
}

/// Invalidation flag for the reconciler.
///
/// Any number of invalidations between two ticks collapse into one pass.
#[derive(Debug, Default)]
pub struct Scheduler {
    dirty: AtomicBool,
    wake: Notify,
}

impl Scheduler {
    /// Create a clean scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pass on the next tick.
    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Consume the pending request, if any.
    pub fn take(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Check for a pending request without consuming it.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Wait for the next invalidation.
    pub async fn invalidated(&self) {
        self.wake.notified().await;
    }
}

/// Handle returned by `open`, exposing the session's readiness.
#[derive(Debug)]
pub struct ReadyHandle {
    key: SessionKey,
    registry: Arc<SessionRegistry>,
    token: watch::Receiver<u64>,
}

impl ReadyHandle {
    pub(crate) fn new(
        key: SessionKey,
        registry: Arc<SessionRegistry>,
        token: watch::Receiver<u64>,
    ) -> Self {
        Self {
            key,
            registry,
            token,
        }
    }

    /// Key of the session this handle watches.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Whether the session is ready. A closed session is not ready.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.registry.is_ready(&self.key)
    }

    /// Wait until the session is ready.
    ///
    /// Returns `false` if the session was closed or the manager went away
    /// before it became ready.
    pub async fn wait_ready(&mut self) -> bool {
        loop {
            let _ = self.token.borrow_and_update();
            if self.ready() {
                return true;
            }
            if !self.registry.contains(&self.key) {
                return false;
            }
            if self.token.changed().await.is_err() {
                return self.ready();
            }
        }
    }
}
