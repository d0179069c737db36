use axum::{http::StatusCode, response::IntoResponse};
use common::error::AppError;
use thiserror::Error;

/// Error type for the admin surface. Operator-facing, so the message is
/// shown directly rather than sanitized the way `api-router`'s public API
/// responses are.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl From<AppError> for AdminError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<minijinja::Error> for AdminError {
    fn from(err: minijinja::Error) -> Self {
        Self::Internal(format!("template error: {err}"))
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
