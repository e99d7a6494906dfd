//! Trade negotiation handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::session::SessionContext;
use crate::state::AppState;
use crate::trade::{ListTradesQuery, ProposeTradeRequest, Trade, TradeDetails, TradeSummary};

/// POST /api/trades - Propose a swap to another user
pub async fn propose_trade(
    State(state): State<AppState>,
    session: SessionContext,
    Json(req): Json<ProposeTradeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Trade>>), ApiError> {
    let trade = state.negotiation.propose(&session, req).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(trade))))
}

/// GET /api/trades?box=received|sent - The caller's trades, newest first
pub async fn list_trades(
    State(state): State<AppState>,
    session: SessionContext,
    Query(query): Query<ListTradesQuery>,
) -> Result<Json<ApiResponse<Vec<TradeSummary>>>, ApiError> {
    let trades = state.negotiation.list(&session, query.side).await?;

    Ok(Json(ApiResponse::ok(trades)))
}

/// GET /api/trades/:id - Trade header for the chat page
pub async fn get_trade(
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TradeDetails>>, ApiError> {
    let details = state.negotiation.view(&session, id).await?;

    Ok(Json(ApiResponse::ok(details)))
}

/// POST /api/trades/:id/accept - Receiver accepts a pending trade
pub async fn accept_trade(
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Trade>>, ApiError> {
    let trade = state.negotiation.accept(&session, id).await?;

    Ok(Json(ApiResponse::ok(trade)))
}

/// POST /api/trades/:id/reject - Receiver rejects a pending trade
pub async fn reject_trade(
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Trade>>, ApiError> {
    let trade = state.negotiation.reject(&session, id).await?;

    Ok(Json(ApiResponse::ok(trade)))
}
