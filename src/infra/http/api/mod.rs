pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::infra::http::middleware::{log_responses, set_request_context};

pub fn build_api_router(state: ApiState) -> Router {
    let viewer_routes = Router::new()
        .route("/api/v1/follow/{id}", post(handlers::follow))
        .route("/api/v1/unfollow/{id}", post(handlers::unfollow))
        .route("/api/v1/block/{id}", post(handlers::block))
        .route("/api/v1/unblock/{id}", post(handlers::unblock))
        .route("/api/v1/mute/{id}", post(handlers::mute))
        .route("/api/v1/unmute/{id}", post(handlers::unmute))
        .route("/api/v1/followers/{id}", get(handlers::followers))
        .route("/api/v1/following/{id}", get(handlers::following))
        .route("/api/v1/feed", get(handlers::get_feed))
        .route("/api/v1/feed/seen", post(handlers::mark_seen))
        .layer(axum_middleware::from_fn(middleware::require_viewer));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(viewer_routes)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
