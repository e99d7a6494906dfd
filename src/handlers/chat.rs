//! Trade chat handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::chat::{Message, SendMessageRequest};
use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::session::SessionContext;
use crate::state::AppState;

/// GET /api/trades/:id/messages - Chat history, oldest first
pub async fn list_messages(
    State(state): State<AppState>,
    session: SessionContext,
    Path(trade_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Message>>>, ApiError> {
    let messages = state.chat_service.history(&session, trade_id).await?;

    Ok(Json(ApiResponse::ok(messages)))
}

/// POST /api/trades/:id/messages - Send a chat message
pub async fn send_message(
    State(state): State<AppState>,
    session: SessionContext,
    Path(trade_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Message>>), ApiError> {
    let message = state
        .chat_service
        .send(&session, trade_id, &req.content)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}
