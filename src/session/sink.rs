//! Event delivery to a session's subscriber.

use tokio::sync::mpsc;

use crate::api::StreamEvent;

/// Sending side of a session's event channel.
///
/// Wraps a bounded channel whose receiving half feeds the SSE response.
/// Emission never blocks stream processing: a full or closed channel is
/// reported as a failed emit and the caller decides what to do about it.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    /// Build a sink and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Attempt to deliver an event.
    ///
    /// Returns false when the subscriber is gone or cannot keep up.
    pub fn try_emit(&self, event: StreamEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    /// Whether the receiving side is still attached.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        !self.tx.is_closed()
    }
}
