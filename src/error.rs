//! Crate-wide error taxonomy and `Result` alias.
//!
//! The variants here are the error kinds surfaced to callers of the core
//! per the specification's error-handling design: cache and retry
//! machinery does what it can before anything reaches this type.

use axum::{http::StatusCode, response::IntoResponse, Json};

/// Crate-wide result alias.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Read path: no usable cache entry and the provider refresh also failed.
    #[error("not cached and provider fetch failed: {0}")]
    NotCachedAndProviderFailed(Box<CoreError>),

    /// Provider returned 429/403 and the single gate-level retry was exhausted.
    #[error("rate limited by provider")]
    RateLimited,

    /// Bearer token was invalid and the legacy key fallback also failed or is absent.
    #[error("unauthorized")]
    Unauthorized,

    /// Timeout, DNS failure, TLS failure, or connection reset talking to the provider.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Provider entity does not exist.
    #[error("not found")]
    NotFound,

    /// Any other non-success provider response, body preserved for diagnostics.
    #[error("provider error ({status}): {body}")]
    ProviderError { status: u16, body: String },

    /// The mutation dispatcher rejected input before making any network call.
    #[error("validation error on field `{field}`: {reason}")]
    ValidationError { field: &'static str, reason: String },

    /// Mutation attempted against a tournament/match in the wrong state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            CoreError::TransportError(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 => CoreError::Unauthorized,
                403 | 429 => CoreError::RateLimited,
                404 => CoreError::NotFound,
                _ => CoreError::ProviderError { status: status.as_u16(), body: err.to_string() },
            }
        } else {
            CoreError::TransportError(err.to_string())
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            CoreError::NotCachedAndProviderFailed(_) => StatusCode::BAD_GATEWAY,
            CoreError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::TransportError(_) => StatusCode::BAD_GATEWAY,
            CoreError::NotFound => StatusCode::NOT_FOUND,
            CoreError::ProviderError { .. } => StatusCode::BAD_GATEWAY,
            CoreError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
