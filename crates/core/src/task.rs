//! Task model and outbound response classification.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::TaskId;
use crate::retry::BackoffStrategy;

/// Header carrying the task identifier on every outbound hook call.
pub const TASK_ID_HEADER: &str = "x-task-id";

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted, waiting for a first claim
    Pending,
    /// Claimed by a worker until `claimed_until`
    Executing,
    /// A transient failure was recorded; eligible again at `due_at`
    Retry,
    /// The hook acknowledged the task
    Completed,
    /// Permanent failure, or the attempt budget ran out
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Executing => "executing",
            TaskStatus::Retry => "retry",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "executing" => Ok(TaskStatus::Executing),
            "retry" => Ok(TaskStatus::Retry),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CoreError::validation(format!(
                "unknown task status {:?}",
                other
            ))),
        }
    }
}

/// Classification of a finished dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The hook acknowledged the task; terminal success.
    Completed,
    /// Transient failure; eligible for another attempt after backoff.
    Retry,
    /// Permanent failure; the hook will not succeed on retry.
    Failed,
}

impl Outcome {
    /// Classify the final HTTP status code of an outbound call.
    ///
    /// Exactly 200 acknowledges the task. 5xx is transient. Everything else
    /// (1xx, non-200 2xx, 3xx left over after the redirect budget, 4xx) is
    /// permanent.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            200 => Outcome::Completed,
            500..=599 => Outcome::Retry,
            _ => Outcome::Failed,
        }
    }
}

/// A task accepted by ingress but not yet persisted.
///
/// `timeout`, `backoff` and `max_attempts` are defaulted from configuration
/// by the ingress layer; `with_*` overrides them per task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: TaskId,
    pub url: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub backoff: BackoffStrategy,
    pub max_attempts: Option<u32>,
}

impl NewTask {
    pub fn new(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id: TaskId::new(),
            url: url.into(),
            body,
            headers: Vec::new(),
            timeout: Duration::from_secs(20),
            backoff: BackoffStrategy::default(),
            max_attempts: Some(5),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// `None` means retry indefinitely on transient errors.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// A persisted task.
///
/// The task store owns this state; workers hold only a transient claim
/// bounded by `claimed_until` and no in-memory state beyond one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Absolute URL to POST to. Immutable.
    pub url: String,
    /// Opaque bytes, forwarded verbatim. Immutable.
    pub body: Vec<u8>,
    /// Header set supplied by ingress, forwarded verbatim. Immutable.
    pub headers: Vec<(String, String)>,
    pub status: TaskStatus,
    /// Dispatch attempts so far; increments on every claim, never decreases.
    pub attempts: u32,
    /// Earliest moment the task is eligible for dispatch.
    pub due_at: DateTime<Utc>,
    /// While set and in the future, a worker owns this task.
    pub claimed_until: Option<DateTime<Utc>>,
    /// HTTP status of the most recent outbound response, if any.
    pub last_status_code: Option<u16>,
    /// Short textual reason for the most recent failure, if any.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Outbound request deadline for each attempt.
    pub timeout: Duration,
    pub backoff: BackoffStrategy,
    /// `None` means retry indefinitely on transient errors.
    pub max_attempts: Option<u32>,
}

impl Task {
    /// Materialize a pending task from an accepted record.
    pub fn from_new(new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            url: new.url,
            body: new.body,
            headers: new.headers,
            status: TaskStatus::Pending,
            attempts: 0,
            due_at: now,
            claimed_until: None,
            last_status_code: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            timeout: new.timeout,
            backoff: new.backoff,
            max_attempts: new.max_attempts,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the stored claim no longer shields this row.
    pub fn claim_expired(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.map_or(true, |until| until <= now)
    }

    /// Dispatch eligibility at `now`.
    ///
    /// A row stuck in `executing` past its claim deadline counts as due
    /// again: the worker that held the claim is presumed dead, and the next
    /// claimant picks the task up with a fresh attempt.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due_at <= now && self.claim_expired(now)
    }

    /// Whether the attempt budget is used up.
    pub fn attempts_exhausted(&self) -> bool {
        self.max_attempts.map_or(false, |max| self.attempts >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_boundaries() {
        assert_eq!(Outcome::from_status_code(200), Outcome::Completed);
        assert_eq!(Outcome::from_status_code(199), Outcome::Failed);
        assert_eq!(Outcome::from_status_code(201), Outcome::Failed);
        assert_eq!(Outcome::from_status_code(404), Outcome::Failed);
        assert_eq!(Outcome::from_status_code(499), Outcome::Failed);
        assert_eq!(Outcome::from_status_code(500), Outcome::Retry);
        assert_eq!(Outcome::from_status_code(599), Outcome::Retry);
        assert_eq!(Outcome::from_status_code(302), Outcome::Failed);
    }

    #[test]
    fn new_task_starts_pending_and_due() {
        let now = Utc::now();
        let task = Task::from_new(NewTask::new("http://h/ok", b"x".to_vec()), now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.due_at, now);
        assert!(task.claimed_until.is_none());
        assert!(task.is_due(now));
    }

    #[test]
    fn due_checks_status_time_and_claim() {
        let now = Utc::now();
        let mut task = Task::from_new(NewTask::new("http://h/ok", vec![]), now);

        task.due_at = now + chrono::Duration::seconds(10);
        assert!(!task.is_due(now));

        task.due_at = now;
        task.claimed_until = Some(now + chrono::Duration::seconds(30));
        assert!(!task.is_due(now));

        // An expired claim no longer shields the task.
        task.claimed_until = Some(now - chrono::Duration::seconds(1));
        assert!(task.is_due(now));

        // A crashed worker's task: executing, claim lapsed.
        task.status = TaskStatus::Executing;
        assert!(task.is_due(now));

        task.status = TaskStatus::Completed;
        task.claimed_until = None;
        assert!(!task.is_due(now));
    }

    #[test]
    fn attempt_budget() {
        let now = Utc::now();
        let mut task =
            Task::from_new(NewTask::new("http://h/ok", vec![]).with_max_attempts(Some(2)), now);

        assert!(!task.attempts_exhausted());
        task.attempts = 2;
        assert!(task.attempts_exhausted());

        task.max_attempts = None;
        task.attempts = u32::MAX;
        assert!(!task.attempts_exhausted());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Executing,
            TaskStatus::Retry,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("running".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
        assert!(!TaskStatus::Retry.is_terminal());
    }
}
