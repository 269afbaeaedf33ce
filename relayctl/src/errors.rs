use crate::db::errors::DbError;
use crate::types::Feature;
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error as ThisError;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The caller exhausted their allowance for a feature
    #[error("Rate limit exceeded for {feature} (limit {limit}, resets at {reset_at})")]
    RateLimited {
        feature: Feature,
        limit: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
    },

    /// A third-party provider failed to serve a forwarded request
    #[error("Upstream provider failed for {feature}: {message}")]
    Upstream {
        feature: Feature,
        message: String,
        retryable: bool,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Conflict error, e.g. a second message sent while a reply is in flight
    #[error("Conflict: {message}")]
    Conflict { message: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Conflict { .. } => StatusCode::CONFLICT,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::RateLimited { .. } => "You have reached your request limit for the day.".to_string(),
            Error::Upstream { feature, retryable, .. } => {
                if *retryable {
                    format!("The {} service is unavailable right now. Please try again.", feature.display_name())
                } else {
                    format!("The {} service could not complete this request.", feature.display_name())
                }
            }
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
            Error::Conflict { message } => message.clone(),
        }
    }

    /// Whether the client may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream { retryable: true, .. } | Error::RateLimited { .. })
    }
}

/// Headers advertising the caller's remaining allowance.
pub fn rate_limit_headers(limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
    headers.insert(RATE_LIMIT_RESET_HEADER, HeaderValue::from(reset_at.timestamp()));
    headers
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Upstream { .. } => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::RateLimited { .. } => {
                tracing::info!("Rate limited: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
        }

        let status = self.status_code();

        match &self {
            Error::RateLimited {
                feature,
                limit,
                remaining,
                reset_at,
            } => {
                let body = json!({
                    "message": self.user_message(),
                    "feature": feature,
                    "limit": limit,
                    "remaining": remaining,
                    "reset": reset_at.timestamp(),
                });
                (status, rate_limit_headers(*limit, *remaining, *reset_at), axum::response::Json(body)).into_response()
            }
            Error::Upstream { feature, retryable, .. } => {
                let body = json!({
                    "message": self.user_message(),
                    "feature": feature,
                    "retryable": retryable,
                });
                (status, axum::response::Json(body)).into_response()
            }
            _ => {
                let user_message = self.user_message();
                (status, user_message).into_response()
            }
        }
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
