//! API error types.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use socksgate_proxy::{ErrorKind, ProxyError};
use thiserror::Error;

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body or query could not be decoded.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The proxy service rejected or failed the request.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::Proxy(e) => {
                let kind = e.kind();
                let status = match kind {
                    ErrorKind::InvalidConfig => StatusCode::BAD_REQUEST,
                    ErrorKind::HostServiceError
                    | ErrorKind::ProxyApplyMismatch
                    | ErrorKind::ConnectionFailure => StatusCode::BAD_GATEWAY,
                    ErrorKind::StorageUnavailable | ErrorKind::ServiceUnavailable => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                (status, kind.as_str())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
