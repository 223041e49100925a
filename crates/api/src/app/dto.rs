use axum::http::HeaderMap;
use serde::Deserialize;

use torque_core::Task;
use torque_infra::TaskCounts;

// -------------------------
// Request DTOs
// -------------------------

/// Query parameters accepted by the enqueue endpoint.
///
/// `timeout` is in seconds; `max_attempts = 0` means retry indefinitely.
#[derive(Debug, Deserialize)]
pub struct EnqueueParams {
    pub url: Option<String>,
    pub timeout: Option<u64>,
    pub backoff: Option<String>,
    pub max_attempts: Option<u32>,
}

// -------------------------
// Header sanitisation
// -------------------------

/// Hop-by-hop and credential headers ingress refuses to forward to hooks.
const DROPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "transfer-encoding",
    "expect",
    "upgrade",
    "authorization",
];

/// The sanitised header set stored with a task and forwarded verbatim on
/// dispatch. `Content-Type` passes through untouched.
pub fn forwarded_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            if DROPPED_HEADERS.contains(&name) {
                return None;
            }
            value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn task_to_json(task: &Task) -> serde_json::Value {
    serde_json::json!({
        "id": task.id.to_string(),
        "url": task.url,
        "status": task.status.as_str(),
        "attempts": task.attempts,
        "due_at": task.due_at.to_rfc3339(),
        "claimed_until": task.claimed_until.map(|t| t.to_rfc3339()),
        "last_status_code": task.last_status_code,
        "last_error": task.last_error,
        "created_at": task.created_at.to_rfc3339(),
        "updated_at": task.updated_at.to_rfc3339(),
        "timeout_secs": task.timeout.as_secs(),
        "backoff": task.backoff.as_str(),
        "max_attempts": task.max_attempts,
    })
}

pub fn counts_to_json(counts: &TaskCounts) -> serde_json::Value {
    serde_json::json!({
        "pending": counts.pending,
        "executing": counts.executing,
        "retry": counts.retry,
        "completed": counts.completed,
        "failed": counts.failed,
        "total": counts.total(),
    })
}
