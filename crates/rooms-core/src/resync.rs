//! Reconnect resync.
//!
//! After the connection comes back, every active room asks the transport
//! for messages newer than its latest confirmed local message and merges
//! them through the inbound path.

use crate::collab::Collaborators;
use crate::metrics;
use crate::multiplexer::{transform, Multiplexer};
use crate::registry::SessionRegistry;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Edge detector over the connectivity signal.
#[derive(Debug, Clone)]
pub struct ConnectivityTracker {
    was_online: bool,
}

impl ConnectivityTracker {
    /// Create a tracker that assumes the connection starts online.
    #[must_use]
    pub fn new() -> Self {
        Self { was_online: true }
    }

    /// Feed the current state. Returns `true` on an offline to online edge.
    pub fn observe(&mut self, connected: bool) -> bool {
        let reconnected = connected && !self.was_online;
        self.was_online = connected;
        reconnected
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one resync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Rooms a request was sent for.
    pub rooms: usize,
    /// Rooms skipped for lack of a confirmed local message.
    pub skipped: usize,
    /// Requests that failed.
    pub failed: usize,
    /// Messages merged into the store.
    pub merged: usize,
    /// Messages dropped because their room was closed before they merged.
    pub dropped: usize,
}

/// Request and merge missed messages for every active room.
///
/// Failures are logged and not retried; the next reconnect tries again.
/// Messages for a room whose stream was detached in the meantime are
/// dropped.
pub async fn resync(
    registry: &SessionRegistry,
    multiplexer: &Multiplexer,
    collab: &Collaborators,
) -> ResyncReport {
    let mut report = ResyncReport::default();
    let mut seen = HashSet::new();

    for (key, room_id) in registry.active_rooms() {
        if !seen.insert(room_id.clone()) {
            continue;
        }
        let Some(latest) = collab.messages.find_latest_non_pending(&room_id) else {
            debug!(session = %key, room = %room_id, "No local messages, skipping resync");
            report.skipped += 1;
            continue;
        };

        report.rooms += 1;
        metrics::record_resync_request();
        let missed = match collab
            .transport
            .request_missed_messages(&room_id, latest.ts)
            .await
        {
            Ok(missed) => missed,
            Err(e) => {
                warn!(room = %room_id, since = latest.ts, error = %e, "Missed message request failed");
                metrics::record_resync_error();
                report.failed += 1;
                continue;
            }
        };

        debug!(room = %room_id, since = latest.ts, count = missed.len(), "Merging missed messages");
        for message in missed {
            let Some(message) = transform(collab, message).await else {
                continue;
            };
            let id = message.id.clone();
            if multiplexer.merge_missed(&room_id, message) {
                report.merged += 1;
            } else {
                debug!(room = %room_id, message = %id, "Room closed during resync, dropping message");
                metrics::record_dropped("detached");
                report.dropped += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_detects_reconnect() {
        let mut tracker = ConnectivityTracker::new();
        assert!(!tracker.observe(true));
        assert!(!tracker.observe(false));
        assert!(!tracker.observe(false));
        assert!(tracker.observe(true));
        assert!(!tracker.observe(true));
    }
}
