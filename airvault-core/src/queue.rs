use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::events::EventMessage;

/// Default poll window when reading a queue inside a worker loop.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(20);

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Creates a bounded event channel.
///
/// Delivery is best-effort: a saturated queue rejects the message instead of
/// blocking the producer. State carried by events is periodically republished
/// by its owner, so a dropped message heals within one refresh interval.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EventMessage>,
}

impl EventSender {
    /// Non-blocking put. Returns false when the queue is full or closed.
    pub fn try_put(&self, message: EventMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Put that never blocks past `timeout`.
    pub async fn put_timeout(&self, message: EventMessage, timeout: Duration) -> bool {
        self.tx.send_timeout(message, timeout).await.is_ok()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<EventMessage>,
}

impl EventReceiver {
    /// Bounded get. A zero timeout is a non-blocking poll.
    pub async fn get(&mut self, timeout: Duration) -> Option<EventMessage> {
        if timeout.is_zero() {
            return self.rx.try_recv().ok();
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(message) => message,
            Err(_) => None,
        }
    }

    /// Exhausts the current backlog without waiting for new messages.
    pub fn drain(&mut self) -> Vec<EventMessage> {
        let mut drained = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            drained.push(message);
        }
        drained
    }

    /// Drops any backlog and releases the channel. Returns how many messages
    /// were still queued.
    pub fn close(mut self) -> usize {
        self.rx.close();
        self.drain().len()
    }
}
