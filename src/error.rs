use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, lock::LockError, state::state_machine::InvalidTransition};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Caller is not allowed to perform this action.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Action is not valid in the current phase or lifecycle status.
    #[error("invalid phase: {0}")]
    InvalidPhase(String),
    /// Caller already answered this question.
    #[error("you already answered this question")]
    AlreadyAnswered,
    /// Caller already voted on this question.
    #[error("you already voted on this question")]
    AlreadyVoted,
    /// The question is about the caller.
    #[error("you are the target of this question and cannot answer it")]
    TargetCannotAnswer,
    /// Non-target voters must have answered first.
    #[error("you must answer this question before voting")]
    MustAnswerFirst,
    /// Not enough room members to play.
    #[error("at least 2 players are required, got {0}")]
    InsufficientPlayers(usize),
    /// Submitted answer is blank.
    #[error("answer content is empty")]
    EmptyContent,
    /// A lock is held by someone else; retry later.
    #[error("busy: `{0}` is held by another request")]
    Busy(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Caller identity is missing.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Storage backend failed.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Lock backend failed.
    #[error("lock service unavailable")]
    LockUnavailable(#[source] LockError),
    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { entity, id, .. } => {
                ServiceError::Busy(format!("{entity}:{id}"))
            }
            StorageError::Missing { entity, id } => ServiceError::NotFound(format!("{entity} `{id}`")),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<LockError> for ServiceError {
    fn from(err: LockError) -> Self {
        ServiceError::LockUnavailable(err)
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidPhase(err.to_string())
    }
}

impl ServiceError {
    /// Failures of the service or its backends rather than of the request.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            ServiceError::Internal(_)
                | ServiceError::Unavailable(_)
                | ServiceError::LockUnavailable(_)
        )
    }

    /// Stable snake_case identifier exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::InvalidPhase(_) => "invalid_phase",
            ServiceError::AlreadyAnswered => "already_answered",
            ServiceError::AlreadyVoted => "already_voted",
            ServiceError::TargetCannotAnswer => "target_cannot_answer",
            ServiceError::MustAnswerFirst => "must_answer_first",
            ServiceError::InsufficientPlayers(_) => "insufficient_players",
            ServiceError::EmptyContent => "empty_content",
            ServiceError::Busy(_) => "busy",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::Degraded => "degraded",
            ServiceError::Unavailable(_) | ServiceError::LockUnavailable(_) => "unavailable",
            ServiceError::Internal(_) => "internal",
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Typed domain failure.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// Request body failed validation.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// JSON error body returned on every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable error code.
    pub code: &'static str,
    /// Human readable explanation.
    pub message: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        let AppError::Service(err) = self else {
            return StatusCode::UNPROCESSABLE_ENTITY;
        };
        match err {
            ServiceError::Forbidden(_)
            | ServiceError::TargetCannotAnswer
            | ServiceError::MustAnswerFirst => StatusCode::FORBIDDEN,
            ServiceError::InvalidPhase(_)
            | ServiceError::AlreadyAnswered
            | ServiceError::AlreadyVoted => StatusCode::CONFLICT,
            ServiceError::InsufficientPlayers(_) | ServiceError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::EmptyContent => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Busy(_)
            | ServiceError::Degraded
            | ServiceError::Unavailable(_)
            | ServiceError::LockUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Service(err) => err.code(),
            AppError::Validation(_) => "invalid_input",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if let AppError::Service(err) = &self {
            if err.is_backend_failure() {
                let source = std::error::Error::source(err)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                tracing::error!(
                    status = status.as_u16(),
                    code = err.code(),
                    error = %err,
                    source,
                    "request failed on backend"
                );
            }
        }

        let retryable = matches!(self, AppError::Service(ServiceError::Busy(_)));
        let payload = Json(ErrorBody {
            code: self.code(),
            message: self.to_string(),
        });

        let mut response = (status, payload).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
