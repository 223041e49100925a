//! Task storage: the single source of truth for task state.
//!
//! `claim` is the sole mutual-exclusion primitive in the system. It
//! serialises contenders on a given id, and every state transition commits
//! through a fencing check on the attempt count, so a stale worker cannot
//! overwrite a newer attempt.

pub mod in_memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use torque_core::{NewTask, Task, TaskId};

pub use in_memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;

/// Result of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The claim succeeded. The snapshot reflects the incremented attempt
    /// count and the new claim deadline.
    Claimed(Task),
    /// The task is missing, terminal, not yet due, or already claimed.
    /// Expected under contention; discard the identifier and move on.
    NotClaimable,
}

/// Per-status task totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskCounts {
    pub pending: u64,
    pub executing: u64,
    pub retry: u64,
    pub completed: u64,
    pub failed: u64,
}

impl TaskCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.executing + self.retry + self.completed + self.failed
    }
}

/// Task store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task already exists: {0}")]
    Conflict(TaskId),
    /// The stored attempt count moved past the committer's snapshot; the
    /// task is owned by a newer attempt.
    #[error("stale commit for task {id}: expected attempt {expected}")]
    Fenced { id: TaskId, expected: u32 },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable, transactional task store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Atomically persist a new task. The task is durably committed before
    /// this returns. Fails with `Conflict` if the id already exists.
    async fn insert(&self, new: NewTask) -> Result<Task, TaskStoreError>;

    /// Attempt to take the exclusive, time-bounded right to dispatch.
    ///
    /// In a single transaction: if the row is non-terminal, is due, and
    /// carries no live claim (which also covers an `executing` row whose
    /// claim lapsed with its worker), set `executing`, stamp
    /// `claimed_until = now + claim_duration`, increment `attempts`, and
    /// return the snapshot. Anything else is `NotClaimable`.
    async fn claim(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
        claim_duration: Duration,
    ) -> Result<ClaimOutcome, TaskStoreError>;

    /// Commit a successful dispatch. Clears the claim; rejects with
    /// `Fenced` if `attempts` has moved past `expected_attempts` or the row
    /// is no longer executing.
    async fn complete(
        &self,
        id: TaskId,
        expected_attempts: u32,
        status_code: u16,
    ) -> Result<(), TaskStoreError>;

    /// Commit a permanent failure. Same fencing rules as `complete`.
    async fn fail(
        &self,
        id: TaskId,
        expected_attempts: u32,
        status_code: Option<u16>,
        error: &str,
    ) -> Result<(), TaskStoreError>;

    /// Commit a transient failure and schedule the next attempt. Same
    /// fencing rules as `complete`.
    async fn schedule_retry(
        &self,
        id: TaskId,
        expected_attempts: u32,
        due_at: DateTime<Utc>,
        status_code: Option<u16>,
        error: &str,
    ) -> Result<(), TaskStoreError>;

    /// Identifiers of tasks eligible for dispatch at `now`, oldest due
    /// first, at most `limit`.
    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>, TaskStoreError>;

    /// Delete terminal rows last touched before `older_than`. Returns the
    /// number removed.
    async fn sweep_terminal(&self, older_than: DateTime<Utc>) -> Result<u64, TaskStoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: TaskId) -> Result<bool, TaskStoreError>;

    /// Returns the number of rows removed.
    async fn delete_all(&self) -> Result<u64, TaskStoreError>;

    async fn counts(&self) -> Result<TaskCounts, TaskStoreError>;
}
