use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

/// Liveness probe; deliberately outside the auth boundary.
pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}
