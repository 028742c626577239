use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for edge operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Edge error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Too Many Requests")]
    TooManyRequests { retry_after: u64 },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("Missing authentication credentials")]
    MissingCredentials,
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ApiError::MissingCredentials => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let ApiError::TooManyRequests { retry_after } = self {
            let body = Json(json!({
                "statusCode": status.as_u16(),
                "message": "Too Many Requests",
                "retryAfter": retry_after,
            }));
            let mut response = (status, body).into_response();
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from(retry_after));
            return response;
        }

        let body = Json(json!({
            "statusCode": status.as_u16(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
