//! Route definitions for the Barterly API

mod auth;
mod listings;
mod profile;
mod storage;
mod trades;

pub use auth::auth_routes;
pub use listings::listing_routes;
pub use profile::profile_routes;
pub use storage::storage_routes;
pub use trades::trade_routes;

use axum::{routing::get, Router};

use crate::handlers;
use crate::state::AppState;
use crate::websocket;

/// Every HTTP and WebSocket route, bound to the given state
pub fn api_router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ws", get(websocket::ws_handler))
        .merge(auth_routes())
        .merge(listing_routes())
        .merge(trade_routes())
        .merge(profile_routes())
        .merge(storage_routes(max_upload_bytes))
        .with_state(state)
}
