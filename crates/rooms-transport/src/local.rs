//! In-process stream hub.
//!
//! `LocalTransport` keeps listeners per `(topic, event)` and dispatches frames
//! to them synchronously. It also plays the server side of the missed-message
//! call from a per-room message log, and exposes a connectivity switch.

use crate::traits::{EventHandler, ListenerId, Transport, TransportError};
use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use rooms_protocol::{codec, EventName, Frame, Message, Topic};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

type ListenerKey = (Topic, EventName);

/// Messages kept per room for missed-message requests.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

/// A recorded missed-message request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedRequest {
    /// Room the request was made for.
    pub room_id: String,
    /// Lower bound (exclusive) of the requested range.
    pub since_ts: u64,
}

/// In-process transport.
pub struct LocalTransport {
    /// Listeners indexed by topic and event.
    listeners: DashMap<ListenerKey, Vec<(ListenerId, EventHandler)>>,
    /// Server-side message log per room, served to missed-message requests.
    /// Oldest entries are dropped beyond `log_capacity`.
    log: DashMap<String, VecDeque<Message>>,
    log_capacity: usize,
    /// Every missed-message request received, in order.
    requests: Mutex<Vec<MissedRequest>>,
    /// Connectivity signal.
    connected: watch::Sender<bool>,
    /// When set, missed-message requests fail.
    fail_requests: AtomicBool,
}

impl LocalTransport {
    /// Create a connected transport with no listeners.
    #[must_use]
    pub fn new() -> Self {
        let (connected, _) = watch::channel(true);
        Self {
            listeners: DashMap::new(),
            log: DashMap::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            requests: Mutex::new(Vec::new()),
            connected,
            fail_requests: AtomicBool::new(false),
        }
    }

    /// Keep at most `capacity` messages per room in the log.
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    /// Publish a frame to its listeners.
    ///
    /// Room messages are also appended to the room's log. Returns the number
    /// of handlers invoked.
    pub fn publish(&self, frame: Frame) -> usize {
        if let Frame::RoomMessage { message } = &frame {
            self.record(message.clone());
        }

        let key = (frame.topic(), frame.event_name());
        // Clone out so handlers may (un)subscribe without holding the shard lock.
        let handlers: Vec<EventHandler> = match self.listeners.get(&key) {
            Some(entry) => entry.iter().map(|(_, h)| h.clone()).collect(),
            None => {
                trace!(topic = %key.0, event = %key.1, "No listeners for frame");
                return 0;
            }
        };

        for handler in &handlers {
            handler(frame.clone());
        }
        trace!(topic = %key.0, event = %key.1, recipients = handlers.len(), "Dispatched frame");
        handlers.len()
    }

    /// Decode one encoded frame and publish it.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not a complete, valid frame.
    pub fn deliver(&self, data: &[u8]) -> Result<usize, TransportError> {
        let frame = codec::decode(data)?;
        Ok(self.publish(frame))
    }

    /// Decode and publish every complete frame in `buf`, leaving any partial
    /// frame in place.
    ///
    /// # Errors
    ///
    /// Returns an error on the first invalid frame.
    pub fn deliver_stream(&self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        let mut frames = 0;
        while let Some(frame) = codec::decode_from(buf)? {
            self.publish(frame);
            frames += 1;
        }
        Ok(frames)
    }

    /// Append a message to the room log without dispatching it, as if it was
    /// posted while this client was away.
    pub fn record(&self, message: Message) {
        let mut log = self.log.entry(message.room_id.clone()).or_default();
        log.push_back(message);
        while log.len() > self.log_capacity {
            log.pop_front();
        }
    }

    /// Number of messages logged for a room.
    #[must_use]
    pub fn logged(&self, room_id: &str) -> usize {
        self.log.get(room_id).map_or(0, |log| log.len())
    }

    /// Flip the connectivity signal.
    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.send_replace(connected);
        if previous != connected {
            debug!(connected, "Connectivity changed");
        }
    }

    /// Check the connectivity signal.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Make missed-message requests fail (or succeed again).
    pub fn set_fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::Relaxed);
    }

    /// Missed-message requests received so far.
    #[must_use]
    pub fn missed_requests(&self) -> Vec<MissedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of listeners on a topic/event pair.
    #[must_use]
    pub fn listener_count(&self, topic: &Topic, event: EventName) -> usize {
        self.listeners
            .get(&(topic.clone(), event))
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Total number of listeners across all topics.
    #[must_use]
    pub fn total_listeners(&self) -> usize {
        self.listeners.iter().map(|entry| entry.len()).sum()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn subscribe(&self, topic: Topic, event: EventName, handler: EventHandler) -> ListenerId {
        let id = ListenerId::generate();
        debug!(topic = %topic, event = %event, listener = %id, "Listener added");
        self.listeners
            .entry((topic, event))
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, topic: &Topic, event: EventName, listener: ListenerId) -> bool {
        let key = (topic.clone(), event);
        let Some(mut entry) = self.listeners.get_mut(&key) else {
            return false;
        };

        let before = entry.len();
        entry.retain(|(id, _)| *id != listener);
        let removed = entry.len() != before;

        if entry.is_empty() {
            drop(entry);
            self.listeners.remove_if(&key, |_, handlers| handlers.is_empty());
        }
        if removed {
            debug!(topic = %topic, event = %event, listener = %listener, "Listener removed");
        }
        removed
    }

    async fn request_missed_messages(
        &self,
        room_id: &str,
        since_ts: u64,
    ) -> Result<Vec<Message>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MissedRequest {
                room_id: room_id.to_string(),
                since_ts,
            });

        if self.fail_requests.load(Ordering::Relaxed) {
            warn!(room = %room_id, "Failing missed-message request");
            return Err(TransportError::RequestFailed(format!(
                "missed messages unavailable for {room_id}"
            )));
        }

        let mut missed: Vec<Message> = self
            .log
            .get(room_id)
            .map(|log| log.iter().filter(|m| m.ts > since_ts).cloned().collect())
            .unwrap_or_default();
        missed.sort_by_key(|m| m.ts);
        Ok(missed)
    }

    fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rooms_protocol::User;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn message(id: &str, room: &str, ts: u64) -> Message {
        Message::new(id, room, User::new("u1", "alice"), "hi").with_ts(ts)
    }

    fn counting_handler() -> (EventHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handler: EventHandler = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[test]
    fn test_subscribe_publish_unsubscribe() {
        let transport = LocalTransport::new();
        let (handler, count) = counting_handler();

        let id = transport.subscribe_room_event("r1", EventName::RoomMessages, handler);
        assert_eq!(transport.publish(Frame::room_message(message("m1", "r1", 1))), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(transport.unsubscribe_room_event("r1", EventName::RoomMessages, id));
        assert_eq!(transport.publish(Frame::room_message(message("m2", "r1", 2))), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(transport.total_listeners(), 0);

        // Removing twice is not an error.
        assert!(!transport.unsubscribe_room_event("r1", EventName::RoomMessages, id));
    }

    #[test]
    fn test_events_are_isolated() {
        let transport = LocalTransport::new();
        let (handler, count) = counting_handler();
        transport.subscribe_room_event("r1", EventName::DeleteMessage, handler);

        transport.publish(Frame::room_message(message("m1", "r1", 1)));
        transport.publish(Frame::delete_message("r2", "m1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        transport.publish(Frame::delete_message("r1", "m1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deliver_stream_keeps_partial_frame() {
        let transport = LocalTransport::new();
        let (handler, count) = counting_handler();
        transport.subscribe_room_event("r1", EventName::RoomMessages, handler);

        let mut buf = BytesMut::new();
        codec::encode_into(&Frame::room_message(message("m1", "r1", 1)), &mut buf).unwrap();
        let second = codec::encode(&Frame::room_message(message("m2", "r1", 2))).unwrap();
        buf.extend_from_slice(&second[..3]);

        assert_eq!(transport.deliver_stream(&mut buf).unwrap(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(buf.len(), 3);
    }

    #[tokio::test]
    async fn test_missed_messages() {
        let transport = LocalTransport::new();
        transport.record(message("m1", "r1", 10));
        transport.record(message("m3", "r1", 30));
        transport.record(message("m2", "r1", 20));

        let missed = transport.request_missed_messages("r1", 10).await.unwrap();
        let ids: Vec<_> = missed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m2", "m3"]);
        assert_eq!(
            transport.missed_requests(),
            vec![MissedRequest {
                room_id: "r1".into(),
                since_ts: 10
            }]
        );
    }

    #[tokio::test]
    async fn test_log_is_capped_per_room() {
        let transport = LocalTransport::new().with_log_capacity(2);
        for (id, ts) in [("m1", 10), ("m2", 20), ("m3", 30)] {
            transport.record(message(id, "r1", ts));
        }
        transport.record(message("x1", "r2", 5));

        assert_eq!(transport.logged("r1"), 2);
        assert_eq!(transport.logged("r2"), 1);
        let missed = transport.request_missed_messages("r1", 0).await.unwrap();
        let ids: Vec<_> = missed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_missed_messages_failures() {
        let transport = LocalTransport::new();

        transport.set_fail_requests(true);
        assert!(matches!(
            transport.request_missed_messages("r1", 0).await,
            Err(TransportError::RequestFailed(_))
        ));

        transport.set_connected(false);
        assert!(matches!(
            transport.request_missed_messages("r1", 0).await,
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_connectivity_signal() {
        let transport = LocalTransport::new();
        let rx = transport.connectivity();
        assert!(*rx.borrow());

        transport.set_connected(false);
        assert!(!*rx.borrow());
        assert!(!transport.is_connected());
    }
}
