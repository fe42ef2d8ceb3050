use crate::api;
use crate::link::session::agent_ws_handler;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

/// Router for the duplex agent endpoint.
pub fn build_agent_app(state: AppState) -> Router {
    Router::new()
        .route("/api/agent/ws", get(agent_ws_handler))
        .with_state(state)
}

/// Router for the read-only operator surface.
pub fn build_http_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/api/metrics/latest", get(api::latest_metrics))
        .route("/api/metrics/range", get(api::range_metrics))
        .route("/api/monitors/{id}/stats", get(api::monitor_stats))
        .route("/api/system-config", get(api::system_config))
        .route(
            "/api/notifications/test/{type}",
            post(api::test_notification_channel),
        )
        .with_state(state)
        .layer(cors)
}
