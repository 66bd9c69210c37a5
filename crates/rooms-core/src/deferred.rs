//! Deferred work queue.
//!
//! Side effects that must not hold up message merging (mention marker
//! refreshes) are queued here and run by the manager driver.

use crate::session::SessionKey;
use tokio::sync::mpsc;
use tracing::trace;

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredTask {
    /// Refresh mention markers on the session's surface.
    MentionMarks(SessionKey),
}

/// Sending side of the deferred queue.
#[derive(Debug, Clone)]
pub struct DeferredQueue {
    tx: mpsc::UnboundedSender<DeferredTask>,
}

impl DeferredQueue {
    /// Create a queue and its receiving end.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeferredTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a task. Returns `false` once the receiver is gone.
    pub fn push(&self, task: DeferredTask) -> bool {
        trace!(?task, "Deferred task queued");
        self.tx.send(task).is_ok()
    }
}
