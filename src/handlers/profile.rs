//! Profile handlers

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::profile::{Profile, UpdateProfileRequest};
use crate::session::SessionContext;
use crate::state::AppState;

/// GET /api/profile - The caller's profile, created on first visit
pub async fn get_own_profile(
    State(state): State<AppState>,
    session: SessionContext,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let profile = state.profile_service.own_profile(&session).await?;

    Ok(Json(ApiResponse::ok(profile)))
}

/// PUT /api/profile - Edit username and avatar
pub async fn update_profile(
    State(state): State<AppState>,
    session: SessionContext,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    req.validate()?;

    let profile = state.profile_service.update(&session, req).await?;

    Ok(Json(ApiResponse::ok(profile)))
}

/// GET /api/profiles/:id - Public profile of any user
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let profile = state.profile_service.get(id).await?;

    Ok(Json(ApiResponse::ok(profile)))
}
