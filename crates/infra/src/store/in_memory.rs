//! In-memory task store for single-process deployments and tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use torque_core::{NewTask, Task, TaskId, TaskStatus};

use super::{ClaimOutcome, TaskCounts, TaskStore, TaskStoreError};

/// In-memory task store.
///
/// Claims and fenced commits run under the write lock, which gives the same
/// serialisation the durable store gets from row-level locking.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        &self,
        id: TaskId,
        expected_attempts: u32,
        apply: impl FnOnce(&mut Task),
    ) -> Result<(), TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;

        if task.status != TaskStatus::Executing || task.attempts != expected_attempts {
            return Err(TaskStoreError::Fenced {
                id,
                expected: expected_attempts,
            });
        }

        apply(task);
        task.claimed_until = None;
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, new: NewTask) -> Result<Task, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&new.id) {
            return Err(TaskStoreError::Conflict(new.id));
        }
        let task = Task::from_new(new, Utc::now());
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn claim(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
        claim_duration: Duration,
    ) -> Result<ClaimOutcome, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(ClaimOutcome::NotClaimable);
        };
        if !task.is_due(now) {
            return Ok(ClaimOutcome::NotClaimable);
        }

        task.status = TaskStatus::Executing;
        task.claimed_until =
            Some(now + chrono::Duration::from_std(claim_duration).unwrap_or_default());
        task.attempts += 1;
        task.updated_at = now;
        Ok(ClaimOutcome::Claimed(task.clone()))
    }

    async fn complete(
        &self,
        id: TaskId,
        expected_attempts: u32,
        status_code: u16,
    ) -> Result<(), TaskStoreError> {
        self.transition(id, expected_attempts, |task| {
            task.status = TaskStatus::Completed;
            task.last_status_code = Some(status_code);
            task.last_error = None;
        })
    }

    async fn fail(
        &self,
        id: TaskId,
        expected_attempts: u32,
        status_code: Option<u16>,
        error: &str,
    ) -> Result<(), TaskStoreError> {
        self.transition(id, expected_attempts, |task| {
            task.status = TaskStatus::Failed;
            task.last_status_code = status_code;
            task.last_error = Some(error.to_string());
        })
    }

    async fn schedule_retry(
        &self,
        id: TaskId,
        expected_attempts: u32,
        due_at: DateTime<Utc>,
        status_code: Option<u16>,
        error: &str,
    ) -> Result<(), TaskStoreError> {
        self.transition(id, expected_attempts, |task| {
            task.status = TaskStatus::Retry;
            task.due_at = due_at;
            task.last_status_code = status_code;
            task.last_error = Some(error.to_string());
        })
    }

    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        let mut due: Vec<_> = tasks.values().filter(|t| t.is_due(now)).collect();
        due.sort_by_key(|t| t.due_at);
        Ok(due.into_iter().take(limit).map(|t| t.id).collect())
    }

    async fn sweep_terminal(&self, older_than: DateTime<Utc>) -> Result<u64, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let before = tasks.len();
        tasks.retain(|_, t| !(t.is_terminal() && t.updated_at < older_than));
        Ok((before - tasks.len()) as u64)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        Ok(self.tasks.read().unwrap().get(&id).cloned())
    }

    async fn delete(&self, id: TaskId) -> Result<bool, TaskStoreError> {
        Ok(self.tasks.write().unwrap().remove(&id).is_some())
    }

    async fn delete_all(&self) -> Result<u64, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let removed = tasks.len() as u64;
        tasks.clear();
        Ok(removed)
    }

    async fn counts(&self) -> Result<TaskCounts, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        let mut counts = TaskCounts::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Executing => counts.executing += 1,
                TaskStatus::Retry => counts.retry += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
