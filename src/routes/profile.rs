//! Profile route definitions

use axum::{routing::get, Router};

use crate::handlers::profile::*;
use crate::state::AppState;

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/api/profile", get(get_own_profile).put(update_profile))
        .route("/api/profiles/:id", get(get_profile))
}
