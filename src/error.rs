//! Boundary error types.
//!
//! Internals return `anyhow::Result`; these enums are what the ingestion job
//! and the read API surface to their callers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Fatal ingestion outcomes (recorded in `scrape_logs` before propagating).
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("scrape returned no data")]
    ScrapeUnavailable,

    #[error("could not parse trade date {raw:?} (expected e.g. \"05 DEC 2025\")")]
    TradeDateUnparseable { raw: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-request authentication outcomes. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("API key required")]
    MissingKey,

    #[error("Invalid API key")]
    InvalidOrInactiveKey,

    #[error("Daily rate limit exceeded ({limit} requests)")]
    DailyQuotaExceeded { limit: i64 },

    #[error("Monthly rate limit exceeded ({limit} requests)")]
    MonthlyQuotaExceeded { limit: i64 },

    #[error("Authentication unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingKey | AuthError::InvalidOrInactiveKey => StatusCode::UNAUTHORIZED,
            AuthError::DailyQuotaExceeded { .. } | AuthError::MonthlyQuotaExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AuthError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AuthError::MissingKey => "missing_api_key",
            AuthError::InvalidOrInactiveKey => "invalid_api_key",
            AuthError::DailyQuotaExceeded { .. } => "daily_limit_exceeded",
            AuthError::MonthlyQuotaExceeded { .. } => "monthly_limit_exceeded",
            AuthError::Unavailable(_) => "auth_unavailable",
        }
    }
}

/// Read API error, rendered as `{"status":"error","error_type":..,"message":..}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(e) => e.status(),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Auth(e) => e.error_type(),
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                tracing::error!("Internal API error: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "status": "error",
            "error_type": self.error_type(),
            "message": message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_statuses() {
        assert_eq!(AuthError::MissingKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidOrInactiveKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::DailyQuotaExceeded { limit: 100 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::MonthlyQuotaExceeded { limit: 5000 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_api_error_wraps_auth_status() {
        let err: ApiError = AuthError::DailyQuotaExceeded { limit: 1 }.into();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    }
}
