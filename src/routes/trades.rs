//! Trade and chat route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{chat, trades};
use crate::state::AppState;

pub fn trade_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/trades",
            get(trades::list_trades).post(trades::propose_trade),
        )
        .route("/api/trades/:id", get(trades::get_trade))
        .route("/api/trades/:id/accept", post(trades::accept_trade))
        .route("/api/trades/:id/reject", post(trades::reject_trade))
        .route(
            "/api/trades/:id/messages",
            get(chat::list_messages).post(chat::send_message),
        )
}
