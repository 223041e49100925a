//! API-facing dispatcher: durable insert, then a bus hint.

use std::sync::Arc;

use tracing::warn;

use torque_bus::NotifyBus;
use torque_core::{NewTask, Task};

use crate::store::{TaskStore, TaskStoreError};

/// Accepts validated task records from the ingress layer.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    bus: Arc<dyn NotifyBus>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TaskStore>, bus: Arc<dyn NotifyBus>) -> Self {
        Self { store, bus }
    }

    /// Persist the task, then announce its identifier on the bus.
    ///
    /// The publish strictly follows the durable commit. A dropped publish is
    /// recovered by the poller, so it never fails the enqueue.
    pub async fn enqueue(&self, new: NewTask) -> Result<Task, TaskStoreError> {
        let task = self.store.insert(new).await?;

        if let Err(e) = self.bus.publish(task.id) {
            warn!(task_id = %task.id, error = ?e, "notify publish dropped");
        }

        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTaskStore;
    use torque_bus::InProcessBus;
    use torque_core::TaskStatus;

    #[tokio::test]
    async fn enqueue_persists_before_publishing() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(InProcessBus::new());
        let mut sub = bus.subscribe();

        let dispatcher = Dispatcher::new(store.clone(), bus.clone());
        let task = dispatcher
            .enqueue(NewTask::new("http://h/ok", b"x".to_vec()))
            .await
            .unwrap();

        // The hint refers to a task that is already durably pending.
        let hinted = sub.recv().await.unwrap();
        assert_eq!(hinted, task.id);

        let stored = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.url, "http://h/ok");
        assert_eq!(stored.body, b"x".to_vec());
    }

    #[tokio::test]
    async fn duplicate_enqueue_surfaces_conflict() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(InProcessBus::new());
        let dispatcher = Dispatcher::new(store, bus);

        let new = NewTask::new("http://h/ok", vec![]);
        dispatcher.enqueue(new.clone()).await.unwrap();

        assert!(matches!(
            dispatcher.enqueue(new).await,
            Err(TaskStoreError::Conflict(_))
        ));
    }
}
