use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::cipher::CipherError;

/// A single field-level validation message.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    /// Duplicate email at signup. Also produced by the storage layer's
    /// unique index when two signups race past the existence pre-check.
    #[error("email already registered")]
    Conflict,

    /// Unknown email and wrong password collapse into this one variant
    /// so callers cannot enumerate accounts.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email not verified")]
    NotVerified,

    /// Verification token unknown, already consumed, or past expiry.
    #[error("invalid or expired token")]
    InvalidOrExpired,

    /// Missing, malformed, unsigned or expired session token. One
    /// outcome for all of them.
    #[error("not authenticated")]
    Unauthenticated,

    /// Authenticated, but the live role is not in the allow-list.
    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    /// Field decryption failed: key or IV corruption. Never masked as
    /// NotFound; operators need to see this.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Internal(e.into())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AuthError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "ValidationError", "fields": fields }),
            ),
            AuthError::Conflict => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Conflict", "message": "Email already registered" }),
            ),
            AuthError::InvalidCredentials => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "InvalidCredentials", "message": "Invalid credentials" }),
            ),
            AuthError::NotVerified => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "NotVerified", "message": "Please verify your email first" }),
            ),
            AuthError::InvalidOrExpired => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "InvalidOrExpired", "message": "Invalid or expired token" }),
            ),
            AuthError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Unauthenticated", "message": "Not authorized to access this route" }),
            ),
            AuthError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({ "error": "Forbidden", "message": "Insufficient role" }),
            ),
            AuthError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "error": "NotFound", "message": "Resource not found" }),
            ),
            AuthError::Cipher(e) => {
                error!(error = %e, "field decryption failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal", "message": "Internal server error" }),
                )
            }
            AuthError::Internal(e) => {
                error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal", "message": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_credentials_keeps_generic_message() {
        let resp = AuthError::InvalidCredentials.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthenticated_and_forbidden_are_distinct_classes() {
        assert_eq!(
            AuthError::Unauthenticated.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn cipher_errors_stay_internal_not_not_found() {
        let err = AuthError::Cipher(CipherError::Decrypt);
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
