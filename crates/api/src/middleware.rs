use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};

/// Shared-credential state for the auth middleware.
#[derive(Clone)]
pub struct AuthState {
    /// When off, every request passes (trusted-network deployments).
    pub authenticate: bool,
    pub token: Option<String>,
}

/// Enforce the shared credential carried in `Authorization: Bearer`.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.authenticate {
        return Ok(next.run(req).await);
    }

    let expected = state.token.as_deref().ok_or(StatusCode::UNAUTHORIZED)?;
    let presented = extract_bearer(req.headers())?;

    if presented != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}

/// Advertise HSTS on every response.
pub async fn hsts_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let mut res = next.run(req).await;
    res.headers_mut().insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    res
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
