//! Image upload handler

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::session::SessionContext;
use crate::state::AppState;
use crate::storage::{upload_image, Bucket};

/// Uploaded object
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

/// POST /api/storage/:bucket - Upload one image from the `file` form field
pub async fn upload(
    State(state): State<AppState>,
    session: SessionContext,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<UploadResponse>>), ApiError> {
    let bucket = Bucket::parse(&bucket)
        .ok_or_else(|| ApiError::NotFound(format!("Bucket {}", bucket)))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?;

        let url = upload_image(
            state.object_store.as_ref(),
            bucket,
            session.user_id(),
            filename.as_deref(),
            &content_type,
            &data,
            state.max_upload_bytes,
        )
        .await?;

        return Ok((StatusCode::CREATED, Json(ApiResponse::ok(UploadResponse { url }))));
    }

    Err(ApiError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}
