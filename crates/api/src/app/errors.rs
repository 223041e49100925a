use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use torque_infra::TaskStoreError;

pub fn store_error_to_response(err: TaskStoreError) -> axum::response::Response {
    match err {
        TaskStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "task not found"),
        TaskStoreError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        TaskStoreError::Fenced { .. } => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        TaskStoreError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
