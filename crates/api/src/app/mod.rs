//! HTTP API application wiring (Axum router + service wiring).
//!
//! Folder layout:
//! - `services.rs`: infrastructure wiring (store/bus selection, dispatcher,
//!   worker pool and poller spawning)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{build_services, spawn_background, AppServices, BackgroundHandles};

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        authenticate: services.config.authenticate,
        token: services.config.auth_token.clone(),
    };
    let enable_hsts = services.config.enable_hsts;

    // Protected routes: require the shared credential.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    let app = Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected);

    if enable_hsts {
        app.layer(axum::middleware::from_fn(middleware::hsts_middleware))
    } else {
        app
    }
}
