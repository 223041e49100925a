//! In-process notify bus for single-process deployments and tests.

use std::sync::Mutex;

use tokio::sync::mpsc;

use torque_core::TaskId;

use crate::bus::{BusError, NotifyBus, Subscription};

/// In-process pub/sub bus.
///
/// - Fan-out to every live subscriber
/// - Dead subscribers are dropped while publishing
/// - No durability, no dedup
#[derive(Debug, Default)]
pub struct InProcessBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TaskId>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotifyBus for InProcessBus {
    fn publish(&self, id: TaskId) -> Result<(), BusError> {
        let mut subs = self.subscribers.lock().map_err(|_| BusError::Poisoned)?;

        subs.retain(|tx| tx.send(id).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let bus = InProcessBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let id = TaskId::new();
        bus.publish(id).unwrap();

        assert_eq!(a.recv().await, Some(id));
        assert_eq!(b.recv().await, Some(id));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_lossy_but_ok() {
        let bus = InProcessBus::new();
        assert!(bus.publish(TaskId::new()).is_ok());

        // A later subscriber does not see earlier publications.
        let mut sub = bus.subscribe();
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn dead_subscribers_are_dropped() {
        let bus = InProcessBus::new();
        drop(bus.subscribe());
        let mut live = bus.subscribe();

        let id = TaskId::new();
        bus.publish(id).unwrap();
        assert_eq!(live.recv().await, Some(id));
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribers_consume_independently() {
        let bus = InProcessBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let first = TaskId::new();
        let second = TaskId::new();
        bus.publish(first).unwrap();
        bus.publish(second).unwrap();

        assert_eq!(a.recv().await, Some(first));
        assert_eq!(a.recv().await, Some(second));
        assert_eq!(b.recv().await, Some(first));
        assert_eq!(b.recv().await, Some(second));
    }
}
