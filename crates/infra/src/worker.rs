//! Worker pool: claims due tasks and performs outbound dispatch.
//!
//! Each worker waits for identifiers from the notify bus and falls back to
//! scanning the store when the bus stays quiet. Identifiers are hints: the
//! claim through the task store is the only thing that grants the right to
//! dispatch, and most hints for already-claimed or already-terminal tasks
//! are expected to be discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use torque_bus::{NotifyBus, Subscription};
use torque_core::{Outcome, RetryPolicy, Task, TaskId, TorqueConfig};

use crate::outbound::{Delivery, DeliveryClient};
use crate::store::{ClaimOutcome, TaskStore, TaskStoreError};

/// Worker pool configuration, derived from the runtime config.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// How long a claim shields a task; must exceed the outbound timeout.
    pub claim_duration: Duration,
    /// How long to wait on the bus before scanning the store directly.
    pub idle_poll_interval: Duration,
    /// Batch size for the idle scan.
    pub poll_batch: usize,
    /// Retries due sooner than this are announced on the bus.
    pub publish_threshold: Duration,
    /// Delay defaults for retry scheduling; the strategy is overridden per
    /// task.
    pub retry_policy: RetryPolicy,
    /// Pause after a store error before touching it again.
    pub store_backoff: Duration,
}

impl WorkerConfig {
    pub fn from_config(config: &TorqueConfig) -> Self {
        Self {
            workers: config.workers,
            claim_duration: config.claim_duration,
            idle_poll_interval: config.poll_interval,
            poll_batch: config.poll_batch,
            publish_threshold: config.publish_threshold,
            retry_policy: config.backoff.policy(),
            store_backoff: Duration::from_secs(1),
        }
    }
}

/// Handle to a running worker pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Stop intake and wait for in-flight attempts to finish.
    ///
    /// The wait is bounded by the outbound timeout: a worker mid-dispatch
    /// completes its claim → HTTP → commit cycle before exiting.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `config.workers` workers against the shared store and bus.
    pub fn spawn(
        store: Arc<dyn TaskStore>,
        bus: Arc<dyn NotifyBus>,
        client: DeliveryClient,
        config: WorkerConfig,
    ) -> WorkerPoolHandle {
        let cancel = CancellationToken::new();
        let mut joins = Vec::with_capacity(config.workers);

        for worker_id in 0..config.workers {
            let worker = Worker {
                id: worker_id,
                store: store.clone(),
                bus: bus.clone(),
                client: client.clone(),
                config: config.clone(),
                cancel: cancel.clone(),
            };
            let subscription = bus.subscribe();
            joins.push(tokio::spawn(worker.run(subscription)));
        }

        WorkerPoolHandle { cancel, joins }
    }
}

struct Worker {
    id: usize,
    store: Arc<dyn TaskStore>,
    bus: Arc<dyn NotifyBus>,
    client: DeliveryClient,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut subscription: Subscription) {
        info!(worker_id = self.id, "worker started");

        loop {
            tokio::select! {
                hint = subscription.recv() => match hint {
                    Some(id) => self.handle_hint(id).await,
                    // Publisher side gone; the store scan keeps us live.
                    None => self.idle_scan().await,
                },
                _ = tokio::time::sleep(self.config.idle_poll_interval) => {
                    self.scan_due().await;
                }
                _ = self.cancel.cancelled() => break,
            }
        }

        info!(worker_id = self.id, "worker stopped");
    }

    async fn idle_scan(&self) {
        self.scan_due().await;
        tokio::select! {
            _ = tokio::time::sleep(self.config.idle_poll_interval) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Ask the store for a due batch when the bus has nothing for us.
    async fn scan_due(&self) {
        let ids = match self
            .store
            .select_due(Utc::now(), self.config.poll_batch)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(worker_id = self.id, error = %e, "due scan failed; backing off");
                tokio::time::sleep(self.config.store_backoff).await;
                return;
            }
        };

        for id in ids {
            if self.cancel.is_cancelled() {
                break;
            }
            self.handle_hint(id).await;
        }
    }

    async fn handle_hint(&self, id: TaskId) {
        match self
            .store
            .claim(id, Utc::now(), self.config.claim_duration)
            .await
        {
            Ok(ClaimOutcome::Claimed(task)) => self.dispatch(task).await,
            Ok(ClaimOutcome::NotClaimable) => {
                debug!(worker_id = self.id, task_id = %id, "hint discarded: not claimable");
            }
            Err(e) => {
                warn!(worker_id = self.id, task_id = %id, error = %e, "claim failed; backing off");
                tokio::time::sleep(self.config.store_backoff).await;
            }
        }
    }

    /// One dispatch attempt: outbound POST, classification, fenced commit.
    async fn dispatch(&self, task: Task) {
        debug!(
            worker_id = self.id,
            task_id = %task.id,
            attempt = task.attempts,
            url = %task.url,
            "dispatching"
        );

        let delivery = self.client.deliver(&task).await;
        let expected = task.attempts;

        let committed = match delivery.outcome {
            Outcome::Completed => {
                info!(
                    worker_id = self.id,
                    task_id = %task.id,
                    attempt = task.attempts,
                    "task completed"
                );
                self.store
                    .complete(task.id, expected, delivery.status_code.unwrap_or(200))
                    .await
            }
            Outcome::Failed => {
                let reason = delivery.error.as_deref().unwrap_or("permanent failure");
                warn!(
                    worker_id = self.id,
                    task_id = %task.id,
                    status_code = delivery.status_code,
                    reason,
                    "task failed permanently"
                );
                self.store
                    .fail(task.id, expected, delivery.status_code, reason)
                    .await
            }
            Outcome::Retry => self.handle_transient(&task, &delivery).await,
        };

        match committed {
            Ok(()) => {}
            Err(TaskStoreError::Fenced { .. }) => {
                // A later attempt owns the task now; it will do the right thing.
                warn!(worker_id = self.id, task_id = %task.id, "commit fenced; discarding result");
            }
            Err(e) => {
                error!(worker_id = self.id, task_id = %task.id, error = %e, "commit failed");
            }
        }
    }

    async fn handle_transient(
        &self,
        task: &Task,
        delivery: &Delivery,
    ) -> Result<(), TaskStoreError> {
        let reason = delivery.error.as_deref().unwrap_or("transient failure");

        if task.attempts_exhausted() {
            warn!(
                worker_id = self.id,
                task_id = %task.id,
                attempts = task.attempts,
                "max attempts exhausted"
            );
            return self
                .store
                .fail(task.id, task.attempts, delivery.status_code, "max attempts exhausted")
                .await;
        }

        let policy = RetryPolicy {
            strategy: task.backoff,
            ..self.config.retry_policy
        };
        let delay = policy.delay_for_attempt(task.attempts);
        let due_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

        debug!(
            worker_id = self.id,
            task_id = %task.id,
            attempt = task.attempts,
            delay_ms = delay.as_millis() as u64,
            reason,
            "scheduling retry"
        );

        self.store
            .schedule_retry(task.id, task.attempts, due_at, delivery.status_code, reason)
            .await?;

        // Near-term retries get a bus hint; later ones wait for the poller.
        if delay <= self.config.publish_threshold {
            if let Err(e) = self.bus.publish(task.id) {
                debug!(task_id = %task.id, error = ?e, "retry publish dropped");
            }
        }

        Ok(())
    }
}
