//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::protocol::ErrorBody;

/// Every way a login, gate check, or rotation can be rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingCredentials,
    InvalidCredentials,
    MissingAccessToken,
    InvalidOrExpiredAccessToken,
    /// Access token verified but its subject no longer exists.
    InvalidAccessToken,
    MissingRefreshToken,
    /// Never issued, already consumed, or swept.
    UnknownRefreshToken,
    InvalidOrExpiredRefreshToken,
    SubjectNotFound,
    OriginNotAllowed(String),
    /// Store or codec failure. Details are logged, never returned.
    Internal,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials | AuthError::MissingRefreshToken => {
                StatusCode::BAD_REQUEST
            }
            AuthError::InvalidCredentials
            | AuthError::MissingAccessToken
            | AuthError::InvalidOrExpiredAccessToken
            | AuthError::InvalidAccessToken
            | AuthError::UnknownRefreshToken
            | AuthError::InvalidOrExpiredRefreshToken
            | AuthError::SubjectNotFound => StatusCode::UNAUTHORIZED,
            AuthError::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            AuthError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            AuthError::MissingCredentials => "Email and password are required".into(),
            AuthError::InvalidCredentials => "Invalid credentials".into(),
            AuthError::MissingAccessToken => "Missing access token".into(),
            AuthError::InvalidOrExpiredAccessToken => "Access token expired or invalid".into(),
            AuthError::InvalidAccessToken => "Invalid access token".into(),
            AuthError::MissingRefreshToken => "Refresh token is required".into(),
            AuthError::UnknownRefreshToken => "Unknown refresh token".into(),
            AuthError::InvalidOrExpiredRefreshToken => "Refresh token expired or invalid".into(),
            AuthError::SubjectNotFound => "Refresh token no longer valid".into(),
            AuthError::OriginNotAllowed(origin) => {
                format!("Origin {} not allowed by CORS", origin)
            }
            AuthError::Internal => "Internal server error".into(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorBody {
                message: self.message(),
            }),
        )
            .into_response()
    }
}
