//! API handlers for the Barterly backend

pub mod auth;
pub mod chat;
pub mod listings;
pub mod profile;
pub mod storage;
pub mod trades;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;
use crate::websocket::WsStats;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub version: String,
    pub websocket: WsStats,
}

/// GET /health - Liveness, a round trip to the store and live connection counts
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, code, database) = match state.store.health.ping().await {
        Ok(()) => ("healthy", StatusCode::OK, "connected".to_string()),
        Err(e) => (
            "unhealthy",
            StatusCode::SERVICE_UNAVAILABLE,
            format!("error: {}", e),
        ),
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            database,
            version: env!("CARGO_PKG_VERSION").to_string(),
            websocket: state.ws_state.stats().await,
        }),
    )
}

pub async fn root() -> &'static str {
    "Barterly API Server"
}
