//! Session lifecycle scenarios.

mod common;

use common::{eventually, key, Harness};
use rooms_protocol::{EventName, Topic, User};
use tenvis_rooms_core::{ManagerConfig, Room};

#[test]
fn test_sixth_room_evicts_oldest() {
    let h = Harness::new();
    h.add_rooms(6);

    for i in 0..6 {
        let ready = h.manager.open(&key(&format!("croom{i}")));
        h.manager.flush();
        assert!(ready.ready(), "room{i} should be ready");
    }

    assert_eq!(h.manager.len(), 5);
    assert!(h.manager.session(&key("croom0")).is_none());
    for i in 1..6 {
        assert!(h.manager.session(&key(&format!("croom{i}"))).is_some());
    }
    let topic = Topic::Room("ROOM0".into());
    assert_eq!(h.transport.listener_count(&topic, EventName::RoomMessages), 0);
}

#[test]
fn test_reopen_refreshes_recency() {
    let h = Harness::new();
    h.add_rooms(6);

    for i in 0..5 {
        h.manager.open(&key(&format!("croom{i}")));
        h.manager.flush();
    }
    // Touch the oldest so the second oldest becomes the victim.
    h.manager.open(&key("croom0"));
    h.manager.open(&key("croom5"));
    h.manager.flush();

    assert!(h.manager.session(&key("croom0")).is_some());
    assert!(h.manager.session(&key("croom1")).is_none());
}

#[test]
fn test_capacity_from_config() {
    let h = Harness::with_config(ManagerConfig { max_rooms_open: 2 });
    h.add_rooms(3);
    for i in 0..3 {
        h.manager.open(&key(&format!("croom{i}")));
        h.manager.flush();
    }
    let keys: Vec<_> = h.manager.sessions().into_iter().map(|s| s.key).collect();
    assert_eq!(keys, vec![key("croom2"), key("croom1")]);
}

#[test]
fn test_size_may_exceed_capacity_until_ready() {
    let h = Harness::with_config(ManagerConfig { max_rooms_open: 1 });
    for i in 0..3 {
        h.manager.open(&key(&format!("cmissing{i}")));
    }
    h.manager.flush();
    // Nothing resolved, nothing became ready, nothing evicted.
    assert_eq!(h.manager.len(), 3);
}

#[test]
fn test_reconcile_is_idempotent() {
    let h = Harness::new();
    h.add_rooms(1);
    h.manager.open(&key("croom0"));

    let first = h.manager.flush();
    assert_eq!(first.advanced, vec![key("croom0")]);
    for _ in 0..3 {
        h.manager.open(&key("croom0"));
        assert!(h.manager.flush().advanced.is_empty());
    }

    let topic = Topic::Room("ROOM0".into());
    for event in [
        EventName::RoomMessages,
        EventName::DeleteMessage,
        EventName::DeleteMessageBulk,
    ] {
        assert_eq!(h.transport.listener_count(&topic, event), 1);
    }
    assert_eq!(h.history.backfill_count("ROOM0"), 1);
}

#[test]
fn test_not_found_retries_every_pass() {
    let h = Harness::new();
    let ready = h.manager.open(&key("clate"));

    for _ in 0..3 {
        let report = h.manager.flush();
        assert_eq!(report.unresolved, vec![key("clate")]);
    }
    assert!(!ready.ready());

    h.directory.insert(Room::new("LATE", 'c', "late"));
    h.manager.flush();
    assert!(ready.ready());
    assert_eq!(h.manager.session_by_room_id("LATE").unwrap().key, key("clate"));
}

#[test]
fn test_close_unknown_is_noop() {
    let h = Harness::new();
    assert!(!h.manager.close(&key("cnothing")));
    assert_eq!(h.manager.close_all_rooms(), 0);
}

#[test]
fn test_logout_closes_everything() {
    let h = Harness::new();
    h.add_rooms(3);
    for i in 0..3 {
        h.manager.open(&key(&format!("croom{i}")));
    }
    h.manager.flush();

    assert_eq!(h.manager.on_logout(), 3);
    assert!(h.manager.is_empty());
    assert_eq!(h.renderer.live_count(), 0);
}

#[test]
fn test_unread_marker_lives_with_session() {
    let h = Harness::new();
    let k = key("croom0");
    h.manager.open(&k);

    let marker = h.manager.unread_marker(&k).unwrap();
    assert!(marker.borrow().is_none());
    h.manager.set_unread_marker(&k, Some(1_700_000_000_000));
    assert_eq!(*marker.borrow(), Some(1_700_000_000_000));

    h.manager.close(&k);
    assert!(h.manager.unread_marker(&k).is_none());
    assert!(!h.manager.set_unread_marker(&k, None));
}

#[tokio::test]
async fn test_driver_makes_sessions_ready() {
    let mut h = Harness::new();
    h.add_rooms(1);
    let driver = h.spawn_driver();

    let mut ready = h.manager.open(&key("croom0"));
    assert!(ready.wait_ready().await);
    assert!(h.manager.session(&key("croom0")).unwrap().stream_attached);

    drop(h.upstream);
    driver.await.unwrap();
}

#[tokio::test]
async fn test_driver_waits_for_app_ready() {
    let mut h = Harness::new();
    h.add_rooms(1);
    h.upstream.set_app_ready(false);
    let _driver = h.spawn_driver();

    let ready = h.manager.open(&key("croom0"));
    common::settle().await;
    assert!(!ready.ready());

    h.upstream.set_app_ready(true);
    assert!(eventually(|| ready.ready()).await);
}

#[tokio::test]
async fn test_first_login_closes_stale_sessions_once() {
    let mut h = Harness::new();
    h.add_rooms(3);
    let _driver = h.spawn_driver();

    h.manager.open(&key("croom0"));
    h.manager.open(&key("croom1"));
    assert!(eventually(|| h.manager.stats().ready == 2).await);

    h.upstream.login(User::new("u1", "alice"));
    assert!(eventually(|| h.manager.is_empty()).await);

    let mut ready = h.manager.open(&key("croom2"));
    assert!(ready.wait_ready().await);

    // A second identity change does not close rooms again.
    h.upstream.login(User::new("u2", "bob"));
    common::settle().await;
    assert_eq!(h.manager.keys(), vec![key("croom2")]);
}
