//! API route definitions

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::middleware::RateLimiter;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check and docs are not rate limited
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs", get(handlers::docs::api_docs))
        .merge(limited_routes(&state))
        .with_state(state)
}

/// Routes counted against the per-client quota
fn limited_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Video metadata
        .route("/api/v1/info/:videoId", get(handlers::video::get_info))
        .route("/api/v1/formats/:videoId", get(handlers::video::get_formats))
        // Media
        .route("/api/v1/stream/:videoId", get(handlers::media::stream_video))
        .route("/api/v1/download/:videoId", get(handlers::media::download_video))
        // Proxy pool
        .route("/api/proxy-status", get(handlers::proxy::proxy_status))
        .route("/api/refresh-proxies", post(handlers::proxy::refresh_proxies))
        .route_layer(from_fn_with_state(
            state.rate_limiter.clone(),
            RateLimiter::enforce,
        ))
}
