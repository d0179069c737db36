use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited {
        message: String,
        limit: i64,
        remaining: i64,
        reset_at: String,
        retry_after_secs: i64,
    },

    #[error("Daily budget exhausted: {0}")]
    BudgetExceeded(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
}

/// Maps the internal error taxonomy (spec.md §7) to the public one. Database
/// and OpenAI transport failures are sanitized to a flat message so internal
/// detail (connection strings, API error bodies) never reaches the client.
impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(_) | AppError::OpenAI(_) | AppError::Join(_) | AppError::Io(_)
            | AppError::Reqwest(_) | AppError::ObjectStore(_) | AppError::Anyhow(_) => {
                tracing::error!(error = ?err, "internal error");
                Self::InternalError("internal server error".to_string())
            }
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::RateLimited(msg) => Self::RateLimited {
                message: msg,
                limit: 0,
                remaining: 0,
                reset_at: String::new(),
                retry_after_secs: 1,
            },
            AppError::BudgetExceeded(retry_after) => Self::BudgetExceeded(retry_after),
            AppError::EmbeddingUnavailable(msg) => {
                tracing::error!(error = %msg, "embedding provider unavailable");
                Self::InternalError("search is temporarily unavailable".to_string())
            }
            AppError::NeedsOcr(msg) => Self::ValidationError(format!("source needs OCR: {msg}")),
            AppError::LLMParsing(msg) => {
                tracing::warn!(error = %msg, "LLM response could not be parsed");
                Self::InternalError("answer generation failed".to_string())
            }
            AppError::Processing(msg) => Self::InternalError(msg),
            AppError::InternalError(msg) => Self::InternalError(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, extra_headers): (StatusCode, &str, String, Vec<(header::HeaderName, String)>) =
            match self {
                Self::InternalError(message) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message, vec![])
                }
                Self::ValidationError(message) => {
                    (StatusCode::BAD_REQUEST, "validation_error", message, vec![])
                }
                Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message, vec![]),
                Self::RateLimited { message, limit, remaining, reset_at, retry_after_secs } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    message,
                    vec![
                        (header::HeaderName::from_static("x-ratelimit-limit"), limit.to_string()),
                        (header::HeaderName::from_static("x-ratelimit-remaining"), remaining.to_string()),
                        (header::HeaderName::from_static("x-ratelimit-reset"), reset_at),
                        (header::RETRY_AFTER, retry_after_secs.max(1).to_string()),
                    ],
                ),
                Self::BudgetExceeded(retry_after) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "budget_exceeded",
                    "daily cost budget exhausted".to_string(),
                    vec![(header::HeaderName::from_static("retry-after"), retry_after)],
                ),
                Self::PayloadTooLarge(message) => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message, vec![])
                }
            };

        let body = ErrorResponse { success: false, error_code: code.to_string(), detail: message };
        let mut response = (status, Json(body)).into_response();
        for (name, value) in extra_headers {
            if let Ok(header_value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, header_value);
            }
        }
        response
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    success: bool,
    error_code: String,
    detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err: ApiError = AppError::NotFound("game absent".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn budget_exceeded_maps_to_503_with_retry_after() {
        let err: ApiError = AppError::BudgetExceeded("2026-07-30T00:00:00Z".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key("retry-after"));
    }

    #[test]
    fn rate_limited_carries_ratelimit_headers() {
        let err = ApiError::RateLimited {
            message: "too many requests".into(),
            limit: 10,
            remaining: 0,
            reset_at: "2026-07-29T00:01:00Z".into(),
            retry_after_secs: 5,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");
        assert_eq!(response.headers().get("retry-after").unwrap(), "5");
    }

    #[test]
    fn internal_error_does_not_leak_database_detail() {
        let err: ApiError = AppError::Validation("this is fine to show".into()).into();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }
}
