//! Authentication middleware
//!
//! Extractors that turn an `Authorization: Bearer` header into the caller's
//! [`SessionContext`].

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;

use crate::auth::{AuthError, AuthService};
use crate::error::ApiError;
use crate::session::SessionContext;

/// Extractor for the authenticated caller
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(session: SessionContext) -> impl IntoResponse {
///     format!("Hello, user {}", session.user_id())
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for SessionContext
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    ApiError::Unauthorized(
                        "Authorization header with Bearer token required".to_string(),
                    )
                })?;

        let auth_service = Arc::<AuthService>::from_ref(state);

        auth_service
            .authenticate(bearer.token())
            .await
            .map_err(|e| match e {
                AuthError::TokenError(_) | AuthError::SessionNotFound => {
                    tracing::debug!(error = %e, "Rejected bearer token");
                    ApiError::Unauthorized(e.to_string())
                }
                other => other.into(),
            })
    }
}
