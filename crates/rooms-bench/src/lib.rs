//! Shared fixtures for the rooms benchmarks.

use std::sync::Arc;
use tenvis_rooms_core::local::{
    LocalDirectory, LocalHistory, LocalRenderer, LocalSubscriptions, PassThroughHooks,
    RecordingBus,
};
use tenvis_rooms_core::{
    Collaborators, ManagerConfig, ManagerDriver, MemoryMessageStore, Room, RoomManager,
    SessionKey, Upstream, UpstreamHandle,
};
use tenvis_rooms_transport::LocalTransport;

/// A manager wired to in-memory collaborators, with every upstream signal
/// raised.
pub struct Fixture {
    pub manager: RoomManager,
    pub driver: ManagerDriver,
    pub upstream: UpstreamHandle,
    pub directory: Arc<LocalDirectory>,
    pub store: Arc<MemoryMessageStore>,
    pub transport: Arc<LocalTransport>,
}

impl Fixture {
    /// Build a fixture with `rooms` resolvable channel rooms `ROOM{i}`.
    #[must_use]
    pub fn new(capacity: usize, rooms: usize) -> Self {
        let directory = Arc::new(LocalDirectory::new());
        let store = Arc::new(MemoryMessageStore::new());
        let transport = Arc::new(LocalTransport::new());
        for i in 0..rooms {
            directory.insert(Room::new(format!("ROOM{i}"), 'c', format!("room{i}")));
        }
        let collab = Collaborators {
            directory: directory.clone(),
            history: Arc::new(LocalHistory::new()),
            messages: store.clone(),
            subscriptions: Arc::new(LocalSubscriptions::new()),
            hooks: Arc::new(PassThroughHooks::new()),
            renderer: Arc::new(LocalRenderer::new()),
            bus: Arc::new(RecordingBus::new()),
            transport: transport.clone(),
        };
        let (upstream, signals) = Upstream::channel();
        upstream.set_all_ready();
        let (manager, driver) = RoomManager::new(
            ManagerConfig {
                max_rooms_open: capacity,
            },
            collab,
            signals,
        );
        Self {
            manager,
            driver,
            upstream,
            directory,
            store,
            transport,
        }
    }
}

/// Key of the `i`th fixture room.
#[must_use]
pub fn room_key(i: usize) -> SessionKey {
    SessionKey::new('c', &format!("room{i}")).expect("room names are never empty")
}
