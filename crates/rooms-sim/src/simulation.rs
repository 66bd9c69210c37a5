//! Scripted session.
//!
//! Opens rooms one after another, streams encoded frames into them, deletes
//! a few messages, drops and restores connectivity and reports what the
//! manager ended up with.

use crate::config::SimulationConfig;
use anyhow::{bail, Context, Result};
use bytes::BytesMut;
use rooms_protocol::{codec, now_millis, BulkDelete, Frame, Message, User};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tenvis_rooms_core::collab::NEW_MESSAGE_EVENT;
use tenvis_rooms_core::local::{
    LocalDirectory, LocalHistory, LocalRenderer, LocalSubscriptions, PassThroughHooks,
    RecordingBus,
};
use tenvis_rooms_core::{
    Collaborators, ManagerConfig, MemoryMessageStore, MessageStore, Room, RoomManager, SessionKey,
    Upstream, UserPresence,
};
use tenvis_rooms_transport::LocalTransport;
use tracing::{debug, info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the run ended with.
#[derive(Debug, Serialize)]
pub struct Summary {
    /// Rooms opened, in order.
    pub opened: Vec<String>,
    /// Sessions still open, most recent first.
    pub open_sessions: Vec<String>,
    /// Sessions closed by eviction.
    pub evicted: usize,
    /// Messages in the store.
    pub messages_stored: usize,
    /// `new-message` events emitted.
    pub messages_delivered: usize,
    /// Missed-message requests sent after reconnecting.
    pub missed_requests: usize,
    /// Online users.
    pub online: Vec<UserPresence>,
}

/// Run the scripted session.
///
/// # Errors
///
/// Returns an error if a room does not become ready in time, a frame cannot
/// be encoded or the resync does not complete.
pub async fn run(config: &SimulationConfig, manager_config: ManagerConfig) -> Result<Summary> {
    let directory = Arc::new(LocalDirectory::new());
    let store = Arc::new(MemoryMessageStore::new());
    let hooks = Arc::new(PassThroughHooks::new());
    let bus = Arc::new(RecordingBus::new());
    let transport = Arc::new(LocalTransport::new());
    if config.hook_delay_ms > 0 {
        hooks.set_delay(Duration::from_millis(config.hook_delay_ms));
    }

    let collab = Collaborators {
        directory: directory.clone(),
        history: Arc::new(LocalHistory::new()),
        messages: store.clone(),
        subscriptions: Arc::new(LocalSubscriptions::new()),
        hooks,
        renderer: Arc::new(LocalRenderer::new()),
        bus: bus.clone(),
        transport: transport.clone(),
    };

    let (upstream, signals) = Upstream::channel();
    upstream.set_all_ready();
    upstream.login(User::new("sim", "simulator"));
    let (manager, driver) = RoomManager::new(manager_config, collab, signals);
    let driver = tokio::spawn(driver.run());

    let mut opened = Vec::with_capacity(config.rooms);
    for i in 0..config.rooms {
        let room = Room::new(format!("ROOM{i}"), 'c', format!("room{i}"));
        directory.insert(room.clone());
        let key = SessionKey::new(room.kind, &room.name)?;

        let mut ready = manager.open(&key);
        let became_ready = tokio::time::timeout(READY_TIMEOUT, ready.wait_ready())
            .await
            .with_context(|| format!("Room {key} did not become ready"))?;
        if !became_ready {
            warn!(session = %key, "Session closed before it became ready");
            continue;
        }
        manager.render_handle(&key, Some(&room.id));
        opened.push(key.to_string());

        stream_messages(&transport, &room.id, config.messages_per_room)?;
        manager.wait_idle().await;
    }

    delete_some(&manager, &transport, &store);
    publish_presence(&transport);

    let mut missed_requests = 0;
    if config.reconnect {
        missed_requests = reconnect(&manager, &transport, &store).await?;
    }
    manager.wait_idle().await;

    let summary = Summary {
        evicted: opened.len().saturating_sub(manager.len()),
        opened,
        open_sessions: manager
            .sessions()
            .into_iter()
            .map(|s| s.key.to_string())
            .collect(),
        messages_stored: store.len(),
        messages_delivered: bus.count(NEW_MESSAGE_EVENT),
        missed_requests,
        online: manager.presence().snapshot(),
    };

    drop(upstream);
    driver.await.context("Driver task failed")?;
    info!(
        open = summary.open_sessions.len(),
        evicted = summary.evicted,
        stored = summary.messages_stored,
        "Simulation complete"
    );
    Ok(summary)
}

/// Encode messages for a room back to back and feed them through the wire
/// path.
fn stream_messages(transport: &LocalTransport, room_id: &str, count: usize) -> Result<()> {
    let author = User::new("u1", "alice");
    let base = now_millis();
    let mut buf = BytesMut::new();
    for n in 0..count {
        let message = Message::new(
            format!("{room_id}-{n}"),
            room_id,
            author.clone(),
            format!("hello #{n}"),
        )
        .with_ts(base + n as u64);
        codec::encode_into(&Frame::room_message(message), &mut buf)?;
    }
    let frames = transport.deliver_stream(&mut buf)?;
    debug!(room = %room_id, frames, "Streamed messages");
    Ok(())
}

/// Delete the first message of the most recent room and bulk-delete the
/// oldest message of the next one.
fn delete_some(manager: &RoomManager, transport: &LocalTransport, store: &MemoryMessageStore) {
    let sessions = manager.sessions();
    let mut rooms = sessions.iter().filter_map(|s| s.room_id.clone());
    if let Some(room_id) = rooms.next() {
        transport.publish(Frame::delete_message(room_id.clone(), format!("{room_id}-0")));
    }
    if let Some(room_id) = rooms.next() {
        if let Some(oldest) = store.messages_in(&room_id).first() {
            transport.publish(Frame::delete_bulk(
                BulkDelete::new(room_id, oldest.ts).exclude_pinned(),
            ));
        }
    }
}

fn publish_presence(transport: &LocalTransport) {
    transport.publish(Frame::user_status(User::new("u1", "alice"), "online", 1.0));
    transport.publish(Frame::user_status(User::new("u2", "bob"), "away", -5.0));
    transport.publish(Frame::user_status(User::new("u3", "carol"), "online", 0.0));
    transport.publish(Frame::user_status(User::new("u3", "carol"), "offline", 0.0));
}

/// Drop the connection, post one message per open room while away, then
/// reconnect and wait for the resync to merge them.
///
/// Rooms without a local message are not resynced and are not waited on.
async fn reconnect(
    manager: &RoomManager,
    transport: &LocalTransport,
    store: &MemoryMessageStore,
) -> Result<usize> {
    transport.set_connected(false);
    tokio::time::sleep(POLL_INTERVAL).await;

    let mut expected = Vec::new();
    for session in manager.sessions() {
        let Some(room_id) = session.room_id else {
            continue;
        };
        if store.find_latest_non_pending(&room_id).is_none() {
            continue;
        }
        let id = format!("{room_id}-missed");
        transport.record(
            Message::new(id.clone(), room_id, User::new("u2", "bob"), "while you were away")
                .with_ts(now_millis() + 1_000),
        );
        expected.push(id);
    }

    transport.set_connected(true);
    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    while !expected.iter().all(|id| store.get(id).is_some()) {
        if tokio::time::Instant::now() >= deadline {
            bail!("Resync did not merge missed messages in time");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(transport.missed_requests().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulation_keeps_capacity() {
        let config = SimulationConfig {
            rooms: 7,
            messages_per_room: 2,
            hook_delay_ms: 0,
            reconnect: true,
        };
        let summary = run(&config, ManagerConfig::default()).await.unwrap();

        assert_eq!(summary.opened.len(), 7);
        assert_eq!(summary.open_sessions.len(), 5);
        assert_eq!(summary.evicted, 2);
        assert_eq!(summary.open_sessions[0], "croom6");
        assert_eq!(summary.messages_delivered, 14);
        assert_eq!(summary.missed_requests, 5);
        let online: Vec<_> = summary.online.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(online, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_simulation_without_reconnect() {
        let config = SimulationConfig {
            rooms: 2,
            messages_per_room: 1,
            hook_delay_ms: 1,
            reconnect: false,
        };
        let summary = run(&config, ManagerConfig { max_rooms_open: 1 }).await.unwrap();

        assert_eq!(summary.open_sessions, vec!["croom1".to_string()]);
        assert_eq!(summary.missed_requests, 0);
    }
}
