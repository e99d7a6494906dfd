//! Listing and browse feed handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;
use crate::listing::{
    CreateListingRequest, FeedQuery, FeedView, Listing, ListingWithOwner, DEFAULT_CATEGORIES,
};
use crate::models::ApiResponse;
use crate::session::SessionContext;
use crate::state::AppState;

/// Query parameters for the caller's own listings
#[derive(Debug, Deserialize, Default)]
pub struct MyListingsQuery {
    /// Only listings that can still be offered in a trade
    #[serde(default)]
    pub available: bool,
}

/// GET /api/listings - Filtered view of the browse feed
pub async fn browse_listings(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Json<ApiResponse<FeedView>> {
    Json(ApiResponse::ok(state.feed.view(&query)))
}

/// POST /api/listings/refresh - Reload the feed now instead of waiting for the timer
pub async fn refresh_listings(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Json<ApiResponse<FeedView>> {
    state.feed.reload_snapshot().await;
    Json(ApiResponse::ok(state.feed.view(&query)))
}

/// GET /api/listings/categories - Categories for the filter dropdown
pub async fn list_categories(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(state.feed.categories()))
}

/// GET /api/listings/categories/defaults - Suggested categories for the create form
pub async fn default_categories() -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(
        DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
    ))
}

/// GET /api/listings/mine - The caller's listings, newest first
pub async fn my_listings(
    State(state): State<AppState>,
    session: SessionContext,
    Query(query): Query<MyListingsQuery>,
) -> Result<Json<ApiResponse<Vec<Listing>>>, ApiError> {
    let listings = state.listing_service.mine(&session, query.available).await?;

    Ok(Json(ApiResponse::ok(listings)))
}

/// GET /api/listings/:id - A single listing with its owner
pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ListingWithOwner>>, ApiError> {
    let listing = state.listing_service.get(id).await?;

    Ok(Json(ApiResponse::ok(listing)))
}

/// POST /api/listings - Publish a listing owned by the caller
pub async fn create_listing(
    State(state): State<AppState>,
    session: SessionContext,
    Json(req): Json<CreateListingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Listing>>), ApiError> {
    req.validate()?;

    let listing = state.listing_service.create(&session, req).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(listing))))
}
