//! The room manager.
//!
//! [`RoomManager`] is the handle embedders call (`open`, `close`, queries);
//! [`ManagerDriver`] is the loop that turns invalidations, upstream signal
//! changes and connectivity edges into reconciler passes and resyncs.

use crate::collab::{Collaborators, RenderHandle};
use crate::config::ManagerConfig;
use crate::deferred::{DeferredQueue, DeferredTask};
use crate::metrics;
use crate::multiplexer::Multiplexer;
use crate::presence::PresenceTracker;
use crate::reactive::{Dependency, ReadyHandle, Scheduler};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::registry::SessionRegistry;
use crate::resync::{self, ConnectivityTracker, ResyncReport};
use crate::session::{SessionKey, SessionSnapshot};
use crate::upstream::Upstream;
use rooms_protocol::{EventName, Frame, Topic, User};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tenvis_rooms_transport::{EventHandler, ListenerId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Manager statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    /// Sessions in the registry.
    pub sessions: usize,
    /// Sessions that are ready.
    pub ready: usize,
    /// Rooms with an attached stream.
    pub attached_rooms: usize,
    /// Messages inside the inbound hook chain.
    pub in_flight: usize,
}

struct Shared {
    config: ManagerConfig,
    collab: Collaborators,
    registry: Arc<SessionRegistry>,
    dependency: Arc<Dependency>,
    scheduler: Scheduler,
    multiplexer: Arc<Multiplexer>,
    reconciler: Reconciler,
    presence: Arc<PresenceTracker>,
    upstream: Upstream,
    /// Serializes reconciler passes between the driver and `flush`.
    pass_lock: Mutex<()>,
    first_login_seen: AtomicBool,
    status_listener: ListenerId,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.collab
            .transport
            .unsubscribe(&Topic::Global, EventName::UserStatus, self.status_listener);
    }
}

/// Handle to the session manager. Cheap to clone.
#[derive(Clone)]
pub struct RoomManager {
    shared: Arc<Shared>,
}

impl RoomManager {
    /// Create a manager and the driver that must be spawned next to it.
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        collab: Collaborators,
        upstream: Upstream,
    ) -> (Self, ManagerDriver) {
        info!(
            max_rooms_open = config.max_rooms_open,
            transport = collab.transport.name(),
            "Creating room manager"
        );

        let (deferred, deferred_rx) = DeferredQueue::channel();
        let registry = Arc::new(SessionRegistry::new());
        let dependency = Arc::new(Dependency::new());
        let multiplexer = Arc::new(Multiplexer::new(collab.clone(), deferred));
        let reconciler = Reconciler::new(
            registry.clone(),
            multiplexer.clone(),
            collab.clone(),
            dependency.clone(),
        );

        let presence = Arc::new(PresenceTracker::new());
        let status_handler: EventHandler = {
            let presence = presence.clone();
            Arc::new(move |frame| {
                if let Frame::UserStatus {
                    user,
                    status,
                    utc_offset,
                } = frame
                {
                    presence.update_user_status(&user, &status, utc_offset);
                }
            })
        };
        let status_listener =
            collab
                .transport
                .subscribe(Topic::Global, EventName::UserStatus, status_handler);

        let connectivity = collab.transport.connectivity();
        let driver_upstream = upstream.clone();
        let manager = Self {
            shared: Arc::new(Shared {
                config,
                collab,
                registry,
                dependency,
                scheduler: Scheduler::new(),
                multiplexer,
                reconciler,
                presence,
                upstream,
                pass_lock: Mutex::new(()),
                first_login_seen: AtomicBool::new(false),
                status_listener,
            }),
        };
        let driver = ManagerDriver {
            manager: manager.clone(),
            upstream: driver_upstream,
            connectivity,
            deferred: deferred_rx,
            tracker: ConnectivityTracker::new(),
        };
        (manager, driver)
    }

    /// Open a session, creating it if needed.
    ///
    /// Returns a handle reporting the session's readiness.
    pub fn open(&self, key: &SessionKey) -> ReadyHandle {
        let shared = &self.shared;
        let touched = shared.registry.touch(key);
        if touched.created {
            debug!(session = %key, "Session created");
            metrics::set_open_sessions(shared.registry.len());
        }
        if touched.was_ready {
            self.close_older_rooms();
        }
        if shared.upstream.subscriptions_ready() && shared.registry.activate(key) {
            trace!(session = %key, "Session activated");
            shared.scheduler.invalidate();
        }
        ReadyHandle::new(key.clone(), shared.registry.clone(), shared.dependency.depend())
    }

    /// Close a session. Returns `false` if it was not open.
    ///
    /// Once this returns, no message for the room is merged on behalf of the
    /// session.
    pub fn close(&self, key: &SessionKey) -> bool {
        let shared = &self.shared;
        let Some(snapshot) = shared.registry.snapshot(key) else {
            return false;
        };

        if let Some(room_id) = snapshot.room_id.as_deref() {
            if snapshot.stream_attached {
                let successor = shared.registry.attached_elsewhere(room_id, key);
                shared.multiplexer.release(room_id, key, successor);
            }
        }

        let Some(session) = shared.registry.remove(key) else {
            return false;
        };
        if let Some(handle) = session.render_handle {
            shared.collab.renderer.destroy_handle(handle);
        }
        if let Some(room_id) = session.room_id.as_deref() {
            shared.collab.history.clear(room_id);
        }
        shared.dependency.changed();
        metrics::set_open_sessions(shared.registry.len());
        debug!(session = %key, room = ?session.room_id, "Session closed");
        true
    }

    /// Close the least recently opened sessions beyond capacity.
    ///
    /// Returns the evicted keys.
    pub fn close_older_rooms(&self) -> Vec<SessionKey> {
        let evicted = self
            .shared
            .registry
            .eviction_candidates(self.shared.config.max_rooms_open);
        for key in &evicted {
            if self.close(key) {
                metrics::record_eviction();
                debug!(session = %key, "Session evicted");
            }
        }
        evicted
    }

    /// Close every session. Returns how many were closed.
    pub fn close_all_rooms(&self) -> usize {
        let keys = self.shared.registry.keys();
        let closed = keys.iter().filter(|key| self.close(key)).count();
        if closed > 0 {
            debug!(closed, "Closed all rooms");
        }
        closed
    }

    /// Request a reconciler pass on the next driver tick.
    pub fn invalidate(&self) {
        self.shared.scheduler.invalidate();
    }

    /// Run one reconciler pass and the eviction settle now.
    pub fn flush(&self) -> ReconcileReport {
        self.shared.scheduler.take();
        self.run_pass()
    }

    fn run_pass(&self) -> ReconcileReport {
        let report = {
            let _pass = self
                .shared
                .pass_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.reconciler.pass(&self.shared.upstream.signals())
        };
        if !report.is_noop() {
            self.close_older_rooms();
        }
        report
    }

    /// React to a change of the current user identity.
    ///
    /// The first identity with a username closes every session opened
    /// before it. User feeds follow the identity.
    pub fn identity_changed(&self) {
        let shared = &self.shared;
        match shared.upstream.user() {
            Some(user) if !user.username.is_empty() => {
                if !shared.first_login_seen.swap(true, Ordering::AcqRel) {
                    info!(user = %user.username, "First login, closing stale rooms");
                    self.close_all_rooms();
                }
                shared.multiplexer.attach_user(&user.id);
            }
            _ => {
                shared.multiplexer.detach_user();
            }
        }
        shared.scheduler.invalidate();
    }

    /// Close every session after logout.
    pub fn on_logout(&self) -> usize {
        info!("Logout, closing all rooms");
        self.close_all_rooms()
    }

    /// Run a deferred task.
    pub fn run_deferred(&self, task: DeferredTask) {
        match task {
            DeferredTask::MentionMarks(key) => {
                self.update_mention_marks(&key);
            }
        }
    }

    /// Refresh mention markers on a session's surface.
    ///
    /// Returns `false` if the session has no render handle.
    pub fn update_mention_marks(&self, key: &SessionKey) -> bool {
        match self.shared.registry.render_handle(key) {
            Some(Some(handle)) => {
                self.shared.collab.renderer.update_mention_marks(handle);
                true
            }
            _ => false,
        }
    }

    /// Request and merge messages missed by every active room.
    pub async fn resync(&self) -> ResyncReport {
        let shared = &self.shared;
        let report = resync::resync(&shared.registry, &shared.multiplexer, &shared.collab).await;
        info!(
            rooms = report.rooms,
            merged = report.merged,
            dropped = report.dropped,
            failed = report.failed,
            "Resync complete"
        );
        report
    }

    /// Wait until no message is inside the inbound hook chain.
    pub async fn wait_idle(&self) {
        self.shared.multiplexer.in_flight().wait_idle().await;
    }

    /// Apply a presence notification.
    pub fn update_user_status(&self, user: &User, status: &str, utc_offset: f64) -> bool {
        self.shared
            .presence
            .update_user_status(user, status, utc_offset)
    }

    /// Online users.
    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.shared.presence
    }

    /// Snapshot of a session.
    #[must_use]
    pub fn session(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        self.shared.registry.snapshot(key)
    }

    /// Snapshots of every session, most recently opened first.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.shared.registry.snapshots()
    }

    /// Session whose resolved room id matches.
    #[must_use]
    pub fn session_by_room_id(&self, room_id: &str) -> Option<SessionSnapshot> {
        self.shared.registry.find_by_room_id(room_id)
    }

    /// Render handle of a session.
    ///
    /// When the session has none and `room_id` is given, one is created.
    /// Unknown keys yield `None`.
    pub fn render_handle(&self, key: &SessionKey, room_id: Option<&str>) -> Option<RenderHandle> {
        let shared = &self.shared;
        let existing = shared.registry.render_handle(key)?;
        if existing.is_some() {
            return existing;
        }
        let room_id = room_id?;

        let handle = shared.collab.renderer.create_handle(room_id);
        if shared.registry.set_render_handle(key, handle) {
            trace!(session = %key, %handle, "Render handle attached");
            return Some(handle);
        }
        // Lost the race against a concurrent creation or close.
        shared.collab.renderer.destroy_handle(handle);
        shared.registry.render_handle(key).flatten()
    }

    /// Check if a session has a render handle.
    #[must_use]
    pub fn has_render_handle(&self, key: &SessionKey) -> bool {
        matches!(self.shared.registry.render_handle(key), Some(Some(_)))
    }

    /// Receiver for a session's unread marker.
    #[must_use]
    pub fn unread_marker(&self, key: &SessionKey) -> Option<watch::Receiver<Option<u64>>> {
        self.shared.registry.unread_marker(key)
    }

    /// Set a session's unread marker. Returns `false` for unknown keys.
    pub fn set_unread_marker(&self, key: &SessionKey, marker: Option<u64>) -> bool {
        self.shared.registry.set_unread_marker(key, marker)
    }

    /// Keys of every session.
    #[must_use]
    pub fn keys(&self) -> Vec<SessionKey> {
        self.shared.registry.keys()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.registry.len()
    }

    /// Check if no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.registry.is_empty()
    }

    /// Manager configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Get manager statistics.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        let snapshots = self.shared.registry.snapshots();
        ManagerStats {
            sessions: snapshots.len(),
            ready: snapshots.iter().filter(|s| s.ready).count(),
            attached_rooms: self.shared.multiplexer.attached_count(),
            in_flight: self.shared.multiplexer.in_flight().count(),
        }
    }
}

/// Loop driving reconciler passes, identity changes, deferred work and
/// reconnect resyncs.
pub struct ManagerDriver {
    manager: RoomManager,
    upstream: Upstream,
    connectivity: watch::Receiver<bool>,
    deferred: mpsc::UnboundedReceiver<DeferredTask>,
    tracker: ConnectivityTracker,
}

impl ManagerDriver {
    /// Run until the upstream signal senders are dropped.
    pub async fn run(mut self) {
        info!("Room manager driver started");
        let mut connectivity_open = true;
        self.tracker.observe(*self.connectivity.borrow_and_update());
        let _ = self.upstream.user.borrow_and_update();
        self.manager.identity_changed();
        self.tick();

        loop {
            tokio::select! {
                () = self.manager.shared.scheduler.invalidated() => {}
                changed = self.upstream.rooms_ready.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.manager.invalidate();
                }
                changed = self.upstream.app_ready.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.manager.invalidate();
                }
                changed = self.upstream.user.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.manager.identity_changed();
                }
                changed = self.connectivity.changed(), if connectivity_open => {
                    match changed {
                        Ok(()) => {
                            let connected = *self.connectivity.borrow_and_update();
                            self.on_connectivity(connected);
                        }
                        Err(_) => {
                            warn!("Connectivity signal closed");
                            connectivity_open = false;
                        }
                    }
                }
                Some(task) = self.deferred.recv() => {
                    self.manager.run_deferred(task);
                }
            }
            self.tick();
        }
        info!("Room manager driver stopped");
    }

    fn tick(&self) {
        if self.manager.shared.scheduler.take() {
            self.manager.run_pass();
        }
    }

    fn on_connectivity(&mut self, connected: bool) {
        debug!(connected, "Connectivity changed");
        if self.tracker.observe(connected) {
            info!("Reconnected, resyncing active rooms");
            let manager = self.manager.clone();
            tokio::spawn(async move {
                manager.resync().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::Room;
    use crate::local::{
        LocalDirectory, LocalHistory, LocalRenderer, LocalSubscriptions, PassThroughHooks,
        RecordingBus,
    };
    use crate::store::MemoryMessageStore;
    use crate::upstream::UpstreamHandle;
    use tenvis_rooms_transport::LocalTransport;

    struct Fixture {
        manager: RoomManager,
        handle: UpstreamHandle,
        directory: Arc<LocalDirectory>,
        renderer: Arc<LocalRenderer>,
        history: Arc<LocalHistory>,
        transport: Arc<LocalTransport>,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(LocalDirectory::new());
        let renderer = Arc::new(LocalRenderer::new());
        let history = Arc::new(LocalHistory::new());
        let transport = Arc::new(LocalTransport::new());
        let collab = Collaborators {
            directory: directory.clone(),
            history: history.clone(),
            messages: Arc::new(MemoryMessageStore::new()),
            subscriptions: Arc::new(LocalSubscriptions::new()),
            hooks: Arc::new(PassThroughHooks::new()),
            renderer: renderer.clone(),
            bus: Arc::new(RecordingBus::new()),
            transport: transport.clone(),
        };
        let (handle, upstream) = Upstream::channel();
        handle.set_all_ready();
        let (manager, _driver) = RoomManager::new(ManagerConfig::default(), collab, upstream);
        Fixture {
            manager,
            handle,
            directory,
            renderer,
            history,
            transport,
        }
    }

    fn key(raw: &str) -> SessionKey {
        SessionKey::parse(raw).unwrap()
    }

    #[test]
    fn test_open_waits_for_subscriptions() {
        let f = fixture();
        f.handle.set_subscriptions_ready(false);
        f.directory.insert(Room::new("GENERAL", 'c', "general"));

        let ready = f.manager.open(&key("cgeneral"));
        f.manager.flush();
        assert!(!ready.ready());
        assert!(!f.manager.session(&key("cgeneral")).unwrap().active);

        f.handle.set_subscriptions_ready(true);
        let ready = f.manager.open(&key("cgeneral"));
        f.manager.flush();
        assert!(ready.ready());
    }

    #[test]
    fn test_close_releases_everything() {
        let f = fixture();
        f.directory.insert(Room::new("GENERAL", 'c', "general"));
        let k = key("cgeneral");
        f.manager.open(&k);
        f.manager.flush();
        let handle = f.manager.render_handle(&k, Some("GENERAL")).unwrap();

        assert!(f.manager.close(&k));
        assert!(!f.manager.close(&k));
        assert!(f.manager.is_empty());
        assert!(!f.renderer.is_live(handle));
        assert_eq!(f.history.cleared(), vec!["GENERAL".to_string()]);
        // Only the global presence listener remains.
        assert_eq!(f.transport.total_listeners(), 1);
    }

    #[test]
    fn test_render_handle_is_lazy() {
        let f = fixture();
        let k = key("cgeneral");
        assert!(f.manager.render_handle(&k, Some("GENERAL")).is_none());

        f.manager.open(&k);
        assert!(f.manager.render_handle(&k, None).is_none());
        assert!(!f.manager.has_render_handle(&k));

        let first = f.manager.render_handle(&k, Some("GENERAL")).unwrap();
        let second = f.manager.render_handle(&k, Some("GENERAL")).unwrap();
        assert_eq!(first, second);
        assert!(f.manager.has_render_handle(&k));
        assert_eq!(f.renderer.live_count(), 1);
    }

    #[test]
    fn test_mention_marks_need_a_surface() {
        let f = fixture();
        let k = key("cgeneral");
        f.manager.open(&k);
        assert!(!f.manager.update_mention_marks(&k));

        let handle = f.manager.render_handle(&k, Some("GENERAL")).unwrap();
        f.manager.run_deferred(DeferredTask::MentionMarks(k.clone()));
        assert_eq!(f.renderer.mention_updates(handle), 1);
    }

    #[test]
    fn test_settle_evicts_oldest() {
        let f = fixture();
        for i in 0..6 {
            f.directory
                .insert(Room::new(format!("R{i}"), 'c', format!("room{i}")));
        }
        // Open six rooms without letting any become ready.
        f.handle.set_rooms_ready(false);
        for i in 0..6 {
            f.manager.open(&key(&format!("croom{i}")));
        }
        f.manager.flush();
        assert_eq!(f.manager.len(), 6);

        f.handle.set_rooms_ready(true);
        f.manager.flush();
        assert_eq!(f.manager.len(), 5);
        assert!(f.manager.session(&key("croom0")).is_none());
    }

    #[test]
    fn test_presence_from_global_stream() {
        let f = fixture();
        f.transport
            .publish(Frame::user_status(User::new("u1", "alice"), "online", 1.0));
        assert!(f.manager.presence().is_online("alice"));

        f.manager
            .update_user_status(&User::new("u1", "alice"), "offline", 1.0);
        assert!(f.manager.presence().is_empty());
    }

    #[test]
    fn test_stats() {
        let f = fixture();
        f.directory.insert(Room::new("GENERAL", 'c', "general"));
        f.manager.open(&key("cgeneral"));
        f.manager.open(&key("cmissing"));
        f.manager.flush();

        let stats = f.manager.stats();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.attached_rooms, 1);
        assert_eq!(stats.in_flight, 0);
    }
}
