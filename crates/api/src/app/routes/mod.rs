use axum::Router;

pub mod system;
pub mod tasks;

pub fn router() -> Router {
    tasks::router()
}
