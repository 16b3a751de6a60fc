/// Unified error types for the account resolver
use crate::{bus::BusError, store::StoreError, trust::Rejection};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the resolver
#[derive(Error, Debug)]
pub enum ResolverError {
    /// Token failed decoding or trust validation
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// Request is well-formed but unusable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Not found errors, including tokens hidden by `check`
    #[error("Not found: {0}")]
    NotFound(String),

    /// Writes against a read-only store
    #[error("JWT store is read-only")]
    ReadOnly,

    /// Unexpected storage failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification bus errors
    #[error("Notification error: {0}")]
    Bus(#[from] BusError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ResolverError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(subject) => ResolverError::NotFound(subject),
            StoreError::ReadOnly => ResolverError::ReadOnly,
            StoreError::InvalidSubject(subject) => {
                ResolverError::InvalidRequest(format!("invalid subject {:?}", subject))
            }
            StoreError::InvalidRoot { .. } => ResolverError::Config(e.to_string()),
            StoreError::Io(_) | StoreError::Watch(_) | StoreError::Unreadable { .. } => ResolverError::Storage(e.to_string()),
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert ResolverError to HTTP response
impl IntoResponse for ResolverError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            ResolverError::Rejected(rejection) => {
                let code = match rejection {
                    Rejection::Malformed(_) => "Malformed",
                    Rejection::UntrustedSigner(_) => "UntrustedSigner",
                    Rejection::Expired(_) => "Expired",
                };
                (StatusCode::BAD_REQUEST, code, self.to_string())
            }
            ResolverError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            ResolverError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
            ),
            ResolverError::ReadOnly => (
                StatusCode::FORBIDDEN,
                "ReadOnly",
                self.to_string(),
            ),
            ResolverError::Storage(_) | ResolverError::Internal(_) => {
                tracing::error!("{}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(), // Don't leak details
                )
            }
            ResolverError::Bus(_) | ResolverError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                self.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for resolver operations
pub type ResolverResult<T> = Result<T, ResolverError>;
