//! Proxy pool handlers

use axum::extract::State;
use axum::Json;
use tracing::info;

use crate::api::server::AppState;
use crate::proxy::{PoolStatus, RefreshOutcome};

/// Number of live proxies a manual refresh looks for
const MANUAL_REFRESH_TARGET: usize = 10;

pub async fn proxy_status(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.pool.status())
}

/// Refetch the candidate lists and re-probe
pub async fn refresh_proxies(State(state): State<AppState>) -> Json<RefreshOutcome> {
    info!("Manual proxy refresh requested");
    Json(state.pool.refresh_now(MANUAL_REFRESH_TARGET).await)
}
