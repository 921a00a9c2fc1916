//! API error handling.
//!
//! Errors are rendered as a short plain-text body. Engine diagnostics and
//! upstream details stay in the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::Error;

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    /// Error code for programmatic handling, logged but not sent
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::BadRequest(msg) => ApiError::bad_request(msg),
            Error::CacheMiss { .. } => ApiError::not_found("Stream expired or not found"),
            Error::EngineUnavailable(msg) => {
                tracing::error!("Media engine unavailable: {}", msg);
                ApiError::internal("Media engine is not available")
            }
            Error::EngineFailed { exit_code, summary } => {
                tracing::error!(?exit_code, "Media engine failed: {}", summary);
                ApiError::internal("Media processing failed")
            }
            Error::UpstreamFetch(_) | Error::UpstreamStatus { .. } | Error::Http(_) => {
                tracing::warn!("Upstream failure: {}", err);
                ApiError::bad_gateway("Failed to fetch media from source")
            }
            Error::Configuration(msg) => ApiError::bad_request(msg),
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
