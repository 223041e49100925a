//! Notify-bus abstraction (mechanics only).
//!
//! At-most-once, unordered, lossy. A consumer receiving an identifier gains
//! no right to the task; it must still claim through the task store.

use std::sync::Arc;

use tokio::sync::mpsc;

use torque_core::TaskId;

/// Notify-bus failure.
///
/// Publish failures are tolerated by every producer; the poller re-derives
/// dropped identifiers from the store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("bus internal state poisoned")]
    Poisoned,
    #[error("transport error: {0}")]
    Transport(String),
}

/// A subscription to the notify stream.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<TaskId>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<TaskId>) -> Self {
        Self { receiver }
    }

    /// Wait until the next identifier is available.
    ///
    /// Returns `None` once the publishing side is gone for good.
    pub async fn recv(&mut self) -> Option<TaskId> {
        self.receiver.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<TaskId> {
        self.receiver.try_recv().ok()
    }
}

/// Best-effort pub/sub channel for task identifiers.
///
/// This is a lightweight contract: no durability, no ordering across
/// producers, no deduplication.
pub trait NotifyBus: Send + Sync {
    /// Publish an identifier. Non-blocking; loss is acceptable.
    fn publish(&self, id: TaskId) -> Result<(), BusError>;

    /// Open an independent consumer of future publications.
    fn subscribe(&self) -> Subscription;
}

impl<B> NotifyBus for Arc<B>
where
    B: NotifyBus + ?Sized,
{
    fn publish(&self, id: TaskId) -> Result<(), BusError> {
        (**self).publish(id)
    }

    fn subscribe(&self) -> Subscription {
        (**self).subscribe()
    }
}
