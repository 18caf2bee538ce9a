//! API error handling
//!
//! Author: hephaex@gmail.com

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use vidtube_core::CoreError;

use crate::auth::jwt::JwtError;
use crate::auth::notifier::NotifyError;
use crate::auth::password::PasswordError;

/// Error envelope returned for every failed request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Always `false`
    pub success: bool,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Failure kinds of the credential and session operations
///
/// Each kind maps to exactly one HTTP status.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    /// A dependency missed its deadline
    #[error("{0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        AuthError::Unauthenticated(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(message.into())
    }
}

impl From<CoreError> for AuthError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Conflict(msg) => AuthError::Conflict(msg),
            CoreError::NotFound(msg) => AuthError::NotFound(msg),
            CoreError::DatabaseError(msg) => {
                tracing::error!(error = %msg, "Credential store failure");
                AuthError::Internal("Database operation failed".to_string())
            }
            CoreError::Internal(msg) => {
                tracing::error!(error = %msg, "Credential store failure");
                AuthError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        tracing::error!(error = %err, "Password hashing failure");
        AuthError::Internal("Internal server error".to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        tracing::error!(error = %err, "Token signing failure");
        AuthError::Internal(
            "Something went wrong while generating refresh and access token".to_string(),
        )
    }
}

impl From<NotifyError> for AuthError {
    fn from(err: NotifyError) -> Self {
        tracing::error!(error = %err, "Password reset delivery failure");
        AuthError::Internal("Error sending email. Please try again later.".to_string())
    }
}

/// Application error type returned by handlers
#[derive(Debug)]
pub struct AppError(pub AuthError);

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), message = %self.0, "Request failed");
        }

        (status, Json(ApiError::new(self.0.to_string()))).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError(err)
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError(err.into())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError(AuthError::Validation(rejection.body_text()))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "Unhandled error");
        AppError(AuthError::Internal("Internal server error".to_string()))
    }
}
