// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::keycloak::IdpError;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Account already migrated")]
    AlreadyMigrated,

    #[error("Signup already in progress for this email")]
    SignupInProgress,

    #[error("Email already registered")]
    EmailAlreadyExists,

    #[error("Identity provider timed out")]
    IdpTimeout,

    #[error("Identity provider error: {0}")]
    IdpSystemError(String),

    #[error("System error: {0}")]
    SystemError(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid or expired signup confirmation")]
    InvalidSignupToken,

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Bot check failed")]
    BotCheckFailed,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<IdpError> for AppError {
    fn from(err: IdpError) -> Self {
        match err {
            IdpError::Timeout => AppError::IdpTimeout,
            other => AppError::IdpSystemError(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(errors.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// HTTP status and stable machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AppError::InvalidRefreshToken => (StatusCode::UNAUTHORIZED, "invalid_refresh_token"),
            AppError::AlreadyMigrated => (StatusCode::CONFLICT, "already_migrated"),
            AppError::SignupInProgress => (StatusCode::CONFLICT, "signup_in_progress"),
            AppError::EmailAlreadyExists => (StatusCode::CONFLICT, "email_already_exists"),
            AppError::IdpTimeout => (StatusCode::GATEWAY_TIMEOUT, "idp_timeout"),
            AppError::IdpSystemError(_) => (StatusCode::BAD_GATEWAY, "idp_error"),
            AppError::SystemError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "system_error"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AppError::InvalidSignupToken => (StatusCode::BAD_REQUEST, "invalid_signup_token"),
            AppError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, "too_many_requests"),
            AppError::BotCheckFailed => (StatusCode::BAD_REQUEST, "bot_check_failed"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_code();

        let details = match &self {
            AppError::NotFound(msg) | AppError::BadRequest(msg) => Some(msg.clone()),
            AppError::IdpSystemError(msg) => {
                tracing::error!(error = %msg, "Identity provider error");
                None
            }
            AppError::SystemError(msg) | AppError::Database(msg) => {
                tracing::error!(error = %msg, "Storage or system error");
                None
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                None
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
