use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::{AppError, ServiceError};

const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated user id, forwarded by the auth layer in front of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Caller(value.to_owned()))
            .ok_or_else(|| {
                ServiceError::Unauthorized("missing user id header `X-User-Id`".into()).into()
            })
    }
}
