//! Readiness reconciler.
//!
//! One pass walks every session that is active but not ready and tries to
//! advance it: resolve the room, backfill history, attach the stream, mark
//! ready. Every step is guarded by a flag on the session, so running a pass
//! any number of times never attaches twice and never regresses `ready`.

use crate::collab::Collaborators;
use crate::metrics;
use crate::multiplexer::{AttachContext, Multiplexer};
use crate::reactive::Dependency;
use crate::registry::SessionRegistry;
use crate::session::SessionKey;
use rooms_protocol::User;
use std::sync::Arc;
use tracing::{debug, trace};

/// Upstream readiness inputs read by a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    /// The room cache finished loading.
    pub rooms_ready: bool,
    /// The application finished booting.
    pub app_ready: bool,
    /// Current user identity.
    pub user: Option<User>,
}

impl Signals {
    fn allow_progress(&self) -> bool {
        self.rooms_ready && self.app_ready
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Sessions that became ready.
    pub advanced: Vec<SessionKey>,
    /// Sessions whose room could not be resolved; retried next pass.
    pub unresolved: Vec<SessionKey>,
    /// Sessions skipped because upstream is not ready.
    pub waiting: usize,
}

impl ReconcileReport {
    /// Check if the pass changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.advanced.is_empty()
    }
}

/// Advances sessions from active to ready.
pub struct Reconciler {
    registry: Arc<SessionRegistry>,
    multiplexer: Arc<Multiplexer>,
    collab: Collaborators,
    dependency: Arc<Dependency>,
}

impl Reconciler {
    /// Create a reconciler over a registry.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        multiplexer: Arc<Multiplexer>,
        collab: Collaborators,
        dependency: Arc<Dependency>,
    ) -> Self {
        Self {
            registry,
            multiplexer,
            collab,
            dependency,
        }
    }

    /// Run one pass.
    pub fn pass(&self, signals: &Signals) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let pending = self.registry.pending_keys();
        if pending.is_empty() {
            return report;
        }
        metrics::record_reconcile_pass();

        if !signals.allow_progress() {
            report.waiting = pending.len();
            trace!(
                waiting = report.waiting,
                rooms_ready = signals.rooms_ready,
                app_ready = signals.app_ready,
                "Upstream not ready, deferring sessions"
            );
            return report;
        }

        for key in pending {
            if self.advance(&key, signals) {
                report.advanced.push(key);
            } else if self.registry.contains(&key) {
                report.unresolved.push(key);
            }
        }

        debug!(
            advanced = report.advanced.len(),
            unresolved = report.unresolved.len(),
            "Reconcile pass complete"
        );
        report
    }

    fn advance(&self, key: &SessionKey, signals: &Signals) -> bool {
        let Some(room) = self
            .collab
            .directory
            .resolve(key.kind(), key.name(), signals.user.as_ref())
        else {
            trace!(session = %key, "Room not found, retrying next pass");
            return false;
        };

        // Store the room id and learn whether the stream still needs attaching.
        let needs_attach = self.registry.with_session_mut(key, |session| {
            if !session.active || session.ready {
                return None;
            }
            session.room_id = Some(room.id.clone());
            Some(!session.stream_attached)
        });
        let Some(needs_attach) = needs_attach.flatten() else {
            return false;
        };

        self.collab.history.backfill_if_empty(&room.id);

        let room_id = room.id.clone();
        if needs_attach {
            self.multiplexer.attach(AttachContext {
                key: key.clone(),
                room,
            });
            let stored = self
                .registry
                .with_session_mut(key, |session| session.stream_attached = true);
            if stored.is_none() {
                // Closed while attaching.
                let successor = self.registry.attached_elsewhere(&room_id, key);
                self.multiplexer.release(&room_id, key, successor);
                return false;
            }
        }

        let advanced = self
            .registry
            .with_session_mut(key, |session| {
                session.ready = true;
            })
            .is_some();
        if advanced {
            self.dependency.changed();
            debug!(session = %key, room = %room_id, "Session ready");
        }
        advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::Room;
    use crate::deferred::DeferredQueue;
    use crate::local::{
        LocalDirectory, LocalHistory, LocalRenderer, LocalSubscriptions, PassThroughHooks,
        RecordingBus,
    };
    use crate::store::MemoryMessageStore;
    use rooms_protocol::{EventName, Topic};
    use tenvis_rooms_transport::LocalTransport;

    struct Fixture {
        reconciler: Reconciler,
        registry: Arc<SessionRegistry>,
        directory: Arc<LocalDirectory>,
        history: Arc<LocalHistory>,
        transport: Arc<LocalTransport>,
        dependency: Arc<Dependency>,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(LocalDirectory::new());
        let history = Arc::new(LocalHistory::new());
        let transport = Arc::new(LocalTransport::new());
        let collab = Collaborators {
            directory: directory.clone(),
            history: history.clone(),
            messages: Arc::new(MemoryMessageStore::new()),
            subscriptions: Arc::new(LocalSubscriptions::new()),
            hooks: Arc::new(PassThroughHooks::new()),
            renderer: Arc::new(LocalRenderer::new()),
            bus: Arc::new(RecordingBus::new()),
            transport: transport.clone(),
        };
        let (queue, _rx) = DeferredQueue::channel();
        let registry = Arc::new(SessionRegistry::new());
        let dependency = Arc::new(Dependency::new());
        let multiplexer = Arc::new(Multiplexer::new(collab.clone(), queue));
        Fixture {
            reconciler: Reconciler::new(
                registry.clone(),
                multiplexer,
                collab,
                dependency.clone(),
            ),
            registry,
            directory,
            history,
            transport,
            dependency,
        }
    }

    fn ready_signals() -> Signals {
        Signals {
            rooms_ready: true,
            app_ready: true,
            user: Some(User::new("u1", "alice")),
        }
    }

    fn key() -> SessionKey {
        SessionKey::parse("cgeneral").unwrap()
    }

    fn open(f: &Fixture) {
        f.registry.touch(&key());
        f.registry.activate(&key());
    }

    #[test]
    fn test_waits_for_upstream() {
        let f = fixture();
        f.directory.insert(Room::new("GENERAL", 'c', "general"));
        open(&f);

        let report = f.reconciler.pass(&Signals {
            rooms_ready: true,
            ..Signals::default()
        });
        assert_eq!(report.waiting, 1);
        assert!(!f.registry.is_ready(&key()));
    }

    #[test]
    fn test_advances_resolved_session() {
        let f = fixture();
        f.directory.insert(Room::new("GENERAL", 'c', "general"));
        open(&f);

        let report = f.reconciler.pass(&ready_signals());
        assert_eq!(report.advanced, vec![key()]);

        let snapshot = f.registry.snapshot(&key()).unwrap();
        assert!(snapshot.ready);
        assert!(snapshot.stream_attached);
        assert_eq!(snapshot.room_id.as_deref(), Some("GENERAL"));
        assert_eq!(f.history.backfill_count("GENERAL"), 1);
        assert_eq!(f.dependency.version(), 1);
    }

    #[test]
    fn test_repeated_passes_attach_once() {
        let f = fixture();
        f.directory.insert(Room::new("GENERAL", 'c', "general"));
        open(&f);

        for _ in 0..3 {
            f.reconciler.pass(&ready_signals());
        }
        let topic = Topic::Room("GENERAL".into());
        assert_eq!(f.transport.listener_count(&topic, EventName::RoomMessages), 1);
        assert_eq!(f.dependency.version(), 1);
    }

    #[test]
    fn test_unresolved_room_retries() {
        let f = fixture();
        open(&f);

        let report = f.reconciler.pass(&ready_signals());
        assert_eq!(report.unresolved, vec![key()]);
        assert!(!f.registry.is_ready(&key()));

        f.directory.insert(Room::new("GENERAL", 'c', "general"));
        let report = f.reconciler.pass(&ready_signals());
        assert_eq!(report.advanced, vec![key()]);
    }

    #[test]
    fn test_inactive_sessions_are_ignored() {
        let f = fixture();
        f.directory.insert(Room::new("GENERAL", 'c', "general"));
        f.registry.touch(&key());

        assert_eq!(f.reconciler.pass(&ready_signals()), ReconcileReport::default());
        assert_eq!(f.transport.total_listeners(), 0);
    }
}
