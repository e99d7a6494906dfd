//! Listing and feed route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::listings::*;
use crate::state::AppState;

pub fn listing_routes() -> Router<AppState> {
    Router::new()
        .route("/api/listings", get(browse_listings).post(create_listing))
        .route("/api/listings/refresh", post(refresh_listings))
        .route("/api/listings/categories", get(list_categories))
        .route("/api/listings/categories/defaults", get(default_categories))
        .route("/api/listings/mine", get(my_listings))
        .route("/api/listings/:id", get(get_listing))
}
