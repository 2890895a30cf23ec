//! Error types for apub-engine.
//!
//! Duplicate deliveries and recursion truncation are not errors and have no
//! variant here; they surface as outcome statuses and context counters.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Protocol Errors ===
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Malformed activity: {0}")]
    MalformedActivity(String),

    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("Unreachable recipient {recipient}: {reason}")]
    UnreachableRecipient { recipient: String, reason: String },

    #[error("Dispatch failure in {kind} handler: {source}")]
    DispatchFailure {
        kind: String,
        #[source]
        source: Box<AppError>,
    },

    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    // === Server Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wrap a handler error as a dispatch failure for the given kind.
    #[must_use]
    pub fn dispatch(kind: impl Into<String>, source: Self) -> Self {
        Self::DispatchFailure {
            kind: kind.into(),
            source: Box::new(source),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            Self::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            Self::MalformedActivity(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::UnknownRecipient(_) => StatusCode::NOT_FOUND,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,

            // 5xx Server Errors
            Self::UnreachableRecipient { .. } | Self::ExternalService(_) | Self::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::DispatchFailure { .. }
            | Self::Configuration(_)
            | Self::Storage(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::AuthorizationDenied(_) => "AUTHORIZATION_DENIED",
            Self::MalformedActivity(_) => "MALFORMED_ACTIVITY",
            Self::UnknownRecipient(_) => "UNKNOWN_RECIPIENT",
            Self::UnreachableRecipient { .. } => "UNREACHABLE_RECIPIENT",
            Self::DispatchFailure { .. } => "DISPATCH_FAILURE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unprocessable(_) => "UNPROCESSABLE",
            Self::Configuration(_) => "CONFIG_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// The innermost error behind any dispatch wrapping.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::DispatchFailure { source, .. } => source.root(),
            other => other,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

// === From implementations ===

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedActivity(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
