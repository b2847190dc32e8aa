//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use understudy_core::ModeError;
use understudy_proxy::ProxyError;

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Body was readable but not a valid payload.
    #[error("unprocessable entity: {0}")]
    Unprocessable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Engine or storage failure.
    #[error("{0}")]
    Proxy(ProxyError),
}

impl From<ProxyError> for ApiError {
    fn from(e: ProxyError) -> Self {
        match e {
            ProxyError::Mode(_) | ProxyError::Config(_) | ProxyError::Destination(_) => {
                ApiError::BadRequest(e.to_string())
            }
            ProxyError::Import(_) | ProxyError::Json(_) | ProxyError::Core(_) => {
                ApiError::Unprocessable(e.to_string())
            }
            other => ApiError::Proxy(other),
        }
    }
}

impl From<ModeError> for ApiError {
    fn from(e: ModeError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unprocessable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::Proxy(_) => (StatusCode::INTERNAL_SERVER_ERROR, "proxy_error"),
        };

        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
