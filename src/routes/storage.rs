//! Upload route definitions

use axum::{extract::DefaultBodyLimit, routing::post, Router};

use crate::handlers::storage::upload;
use crate::state::AppState;

/// Multipart framing on top of the image itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn storage_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/api/storage/:bucket", post(upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD))
}
