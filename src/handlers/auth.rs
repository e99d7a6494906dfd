//! Authentication HTTP handlers
//!
//! Email and password sign-up/sign-in, token refresh and sign-out.

use axum::{extract::State, Json};
use validator::Validate;

use crate::error::ApiError;
use crate::models::{
    ApiResponse, Identity, RefreshTokenRequest, Session, SignInRequest, SignUpRequest,
};
use crate::session::SessionContext;
use crate::state::AppState;

/// POST /auth/sign-up - Register an account with a chosen username
pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<Json<ApiResponse<Session>>, ApiError> {
    req.validate()?;

    let session = state
        .auth_service
        .sign_up(&req.email, &req.password, &req.username)
        .await?;

    Ok(Json(ApiResponse::ok(session)))
}

/// POST /auth/sign-in - Exchange email and password for tokens
pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<ApiResponse<Session>>, ApiError> {
    req.validate()?;

    let session = state.auth_service.sign_in(&req.email, &req.password).await?;

    Ok(Json(ApiResponse::ok(session)))
}

/// POST /auth/refresh - Refresh access token using refresh token
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<ApiResponse<Session>>, ApiError> {
    let session = state.auth_service.refresh(&req.refresh_token).await?;

    Ok(Json(ApiResponse::ok(session)))
}

/// POST /auth/sign-out - Revoke the current session
pub async fn sign_out(
    State(state): State<AppState>,
    session: SessionContext,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.auth_service.sign_out(&session).await?;

    Ok(Json(ApiResponse::ok(())))
}

/// GET /auth/session - Identity behind the bearer token
pub async fn current_session(session: SessionContext) -> Json<ApiResponse<Identity>> {
    Json(ApiResponse::ok(session.identity))
}
