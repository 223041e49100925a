use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use torque_core::{BackoffStrategy, NewTask, TaskId};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(enqueue).delete(purge))
        .route("/tasks/:id", get(get_task).delete(delete_task))
        .route("/stats", get(stats))
}

/// Enqueue a task: the target URL comes from the `url` query parameter, the
/// body is stored verbatim, and the sanitised request headers are forwarded
/// on dispatch.
pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::EnqueueParams>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let url = match params.url {
        Some(url) => url,
        None => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "missing_url",
                "url query parameter is required",
            )
        }
    };
    if let Err(resp) = validate_hook_url(&url) {
        return resp;
    }

    let timeout = match params.timeout {
        Some(0) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_timeout",
                "timeout must be at least 1 second",
            )
        }
        Some(secs) => Duration::from_secs(secs),
        None => services.config.task_timeout,
    };
    if timeout >= services.config.claim_duration {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_timeout",
            format!(
                "timeout must stay below the claim duration ({}s)",
                services.config.claim_duration.as_secs()
            ),
        );
    }

    let backoff = match params.backoff.as_deref() {
        Some(raw) => match raw.parse::<BackoffStrategy>() {
            Ok(strategy) => strategy,
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_backoff", e.to_string())
            }
        },
        None => services.config.backoff.strategy,
    };

    // 0 means retry indefinitely, mirroring the config semantics.
    let max_attempts = match params.max_attempts {
        Some(0) => None,
        Some(n) => Some(n),
        None => services.config.backoff.max_attempts,
    };

    let new = NewTask::new(url, body.to_vec())
        .with_headers(dto::forwarded_headers(&headers))
        .with_timeout(timeout)
        .with_backoff(backoff)
        .with_max_attempts(max_attempts);

    match services.dispatcher.enqueue(new).await {
        Ok(task) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": task.id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TaskId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid task id")
        }
    };

    match services.store.get(id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(dto::task_to_json(&task))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "task not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn delete_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TaskId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid task id")
        }
    };

    match services.store.delete(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({ "deleted": id.to_string() })),
        )
            .into_response(),
        Ok(false) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "task not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn purge(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.store.delete_all().await {
        Ok(deleted) => (
            StatusCode::OK,
            Json(serde_json::json!({ "deleted": deleted })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.store.counts().await {
        Ok(counts) => (StatusCode::OK, Json(dto::counts_to_json(&counts))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// The hook URL must be absolute http(s) with a host.
fn validate_hook_url(raw: &str) -> Result<(), axum::response::Response> {
    let parsed = url::Url::parse(raw).map_err(|e| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_url",
            format!("url must be absolute: {e}"),
        )
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_url",
            "url scheme must be http or https",
        ));
    }
    if parsed.host_str().is_none() {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_url",
            "url must include a host",
        ));
    }
    Ok(())
}
