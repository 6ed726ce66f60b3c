use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ApiError;

/// Header installed by the upstream auth gateway after JWT verification.
/// Token validation itself happens outside this service.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller identity, extracted per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or(ApiError::Unauthorized)?;

        Ok(AuthenticatedUser { user_id })
    }
}
