//! Error types and handling for the load balancer and rate limiter services.
//!
//! This module provides a unified error type [`AppError`] that wraps various error sources
//! and implements proper HTTP response conversion. Every HTTP error response carries the
//! same flat JSON body shape: `{"code": <status>, "message": "..."}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
///
/// All errors in the application should be converted to this type for consistent handling.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// An upstream address in the pool configuration failed URL validation
    #[error("Invalid upstream address: {0}")]
    InvalidUpstream(String),

    /// Every server in the pool is currently marked dead
    #[error("no available server")]
    NoAvailableServer,

    /// HTTP request errors from the reqwest client
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database errors from the capacity store
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request arrived without the rate-limit key header
    #[error("No X-API-Key provided")]
    MissingApiKey,

    /// The token bucket denied admission for the caller's key
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Client provided invalid data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::InvalidUpstream(addr) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Invalid upstream address: {}", addr),
            ),
            AppError::NoAvailableServer => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no available server".to_string(),
            ),
            AppError::Request(e) => {
                // Sanitize transport errors: reqwest messages embed upstream URLs
                if e.is_timeout() {
                    (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout".to_string())
                } else if e.is_connect() {
                    (
                        StatusCode::BAD_GATEWAY,
                        "Failed to connect to upstream server".to_string(),
                    )
                } else if let Some(status) = e.status() {
                    (
                        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
                        "Upstream request failed".to_string(),
                    )
                } else {
                    (
                        StatusCode::BAD_GATEWAY,
                        "Upstream request failed".to_string(),
                    )
                }
            }
            AppError::Serialization(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to update capacity".to_string(),
            ),
            AppError::MissingApiKey => (
                StatusCode::BAD_REQUEST,
                "No X-API-Key provided".to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "code": status.as_u16(),
            "message": error_message
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
