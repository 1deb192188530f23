use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::models::{ClassifiedError, ErrorKind};

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// DGII reports the identifier as not registered.
    NotRegistered(String),
    /// Upstream failure that is safe to retry later (network, banner, empty page).
    UpstreamTransient(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotRegistered(msg) => write!(f, "Not registered: {}", msg),
            AppError::UpstreamTransient(msg) => write!(f, "Upstream unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Lookup failures carry a `kind` so clients can tell a confirmed negative
    /// (404, do not retry) from a transient upstream problem (503, retry later).
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Database error" }),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotRegistered(msg) => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "Identifier not registered as taxpayer",
                    "kind": "not_registered",
                    "message": msg,
                }),
            ),
            AppError::UpstreamTransient(msg) => {
                tracing::warn!("Upstream transient error: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "error": "DGII lookup temporarily unavailable",
                        "kind": "upstream_transient",
                        "message": msg,
                    }),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.clone().into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound), // Simplified clone
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::NotRegistered(msg) => AppError::NotRegistered(msg.clone()),
            AppError::UpstreamTransient(msg) => AppError::UpstreamTransient(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<ClassifiedError> for AppError {
    /// `EmptyResponse` is ambiguous, so it surfaces like any other transient failure.
    fn from(err: ClassifiedError) -> Self {
        match err.kind {
            ErrorKind::NotRegistered => AppError::NotRegistered(err.message),
            ErrorKind::UpstreamTransient | ErrorKind::EmptyResponse => {
                AppError::UpstreamTransient(err.message)
            }
        }
    }
}

impl From<crate::form_client::FetchError> for AppError {
    /// Network and page-layout failures are both retryable from the caller's side.
    fn from(err: crate::form_client::FetchError) -> Self {
        AppError::UpstreamTransient(err.to_string())
    }
}

impl From<crate::cache_store::StoreError> for AppError {
    fn from(err: crate::cache_store::StoreError) -> Self {
        match err {
            crate::cache_store::StoreError::Database(e) => AppError::DatabaseError(e),
            other => AppError::InternalError(other.to_string()),
        }
    }
}

/// Extension trait for adding context to storage errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, crate::cache_store::StoreError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: context.into(),
        })
    }
}
