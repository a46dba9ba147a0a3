//! Error types for blogfed
//!
//! All request-path errors are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Outbound delivery failures use `DeliveryError` so the queue worker
//! can account for them without going through HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// while serving requests or running background work. It implements
/// `IntoResponse` to convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Queue storage error (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Federation error (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Signature verification failed (401)
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Key handling or signing failure (500)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body. Internal details are logged, not returned.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::InvalidSignature(_) => {
                (StatusCode::UNAUTHORIZED, "Invalid signature".to_string())
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Federation(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            AppError::Storage(_) | AppError::Crypto(_) | AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Outbound delivery failure
///
/// Every variant counts as one failed attempt in the queue's retry accounting.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Remote inbox answered with a status outside {200, 201, 202, 204}
    #[error("inbox answered with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Send did not complete within the delivery timeout
    #[error("delivery timed out")]
    Timeout,

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Request could not be built or signed
    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Transport(err.to_string())
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_errors_map_to_unauthorized() {
        let response = AppError::InvalidSignature("digest mismatch".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn forbidden_and_validation_map_to_client_errors() {
        assert_eq!(
            AppError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Validation("bad".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
    }
}
