//! Shared harness for the integration tests.

#![allow(dead_code)]

use rooms_protocol::{Message, User};
use std::sync::Arc;
use std::time::Duration;
use tenvis_rooms_core::local::{
    LocalDirectory, LocalHistory, LocalRenderer, LocalSubscriptions, PassThroughHooks,
    RecordingBus,
};
use tenvis_rooms_core::{
    Collaborators, ManagerConfig, ManagerDriver, MemoryMessageStore, Room, RoomManager,
    SessionKey, Upstream, UpstreamHandle,
};
use tenvis_rooms_transport::LocalTransport;

pub struct Harness {
    pub manager: RoomManager,
    pub upstream: UpstreamHandle,
    pub directory: Arc<LocalDirectory>,
    pub history: Arc<LocalHistory>,
    pub store: Arc<MemoryMessageStore>,
    pub subscriptions: Arc<LocalSubscriptions>,
    pub hooks: Arc<PassThroughHooks>,
    pub renderer: Arc<LocalRenderer>,
    pub bus: Arc<RecordingBus>,
    pub transport: Arc<LocalTransport>,
    pub driver: Option<ManagerDriver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let directory = Arc::new(LocalDirectory::new());
        let history = Arc::new(LocalHistory::new());
        let store = Arc::new(MemoryMessageStore::new());
        let subscriptions = Arc::new(LocalSubscriptions::new());
        let hooks = Arc::new(PassThroughHooks::new());
        let renderer = Arc::new(LocalRenderer::new());
        let bus = Arc::new(RecordingBus::new());
        let transport = Arc::new(LocalTransport::new());
        let collab = Collaborators {
            directory: directory.clone(),
            history: history.clone(),
            messages: store.clone(),
            subscriptions: subscriptions.clone(),
            hooks: hooks.clone(),
            renderer: renderer.clone(),
            bus: bus.clone(),
            transport: transport.clone(),
        };
        let (upstream, signals) = Upstream::channel();
        upstream.set_all_ready();
        let (manager, driver) = RoomManager::new(config, collab, signals);
        Self {
            manager,
            upstream,
            directory,
            history,
            store,
            subscriptions,
            hooks,
            renderer,
            bus,
            transport,
            driver: Some(driver),
        }
    }

    /// Register channel rooms `ROOM0..ROOMn` named `room0..roomn`.
    pub fn add_rooms(&self, count: usize) {
        for i in 0..count {
            self.directory
                .insert(Room::new(format!("ROOM{i}"), 'c', format!("room{i}")));
        }
    }

    /// Spawn the driver on the current runtime.
    pub fn spawn_driver(&mut self) -> tokio::task::JoinHandle<()> {
        let driver = self.driver.take().expect("driver already spawned");
        tokio::spawn(driver.run())
    }
}

pub fn key(raw: &str) -> SessionKey {
    SessionKey::parse(raw).unwrap()
}

pub fn message(id: &str, room_id: &str, ts: u64) -> Message {
    Message::new(id, room_id, User::new("u1", "alice"), format!("message {id}")).with_ts(ts)
}

/// Give spawned tasks time to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
