//! Error types for the jailmaker server

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the jailmaker server
///
/// Messages are shown to the browser as-is, so no variant may carry the
/// remote password.
#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors (2000-2999)
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("No server details saved for user: {0}")]
    EndpointNotConfigured(String),

    #[error("No paths configured for user: {0}")]
    NoPathsConfigured(String),

    // Connection errors (3000-3999)
    #[error("SSH connection error: {0}")]
    SshConnection(String),

    #[error("SSH authentication failed for {0}")]
    SshAuthentication(String),

    #[error("SSH channel error: {0}")]
    SshChannel(String),

    // Remote command errors (4000-4999)
    #[error("Remote command failed: {0}")]
    RemoteCommandFailed(String),

    // Protocol errors (1000-1999)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    // Infrastructure errors (6000-6999)
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidRequest(_) => 1001,
            Error::InvalidParameter(_) => 1002,
            Error::MissingParameter(_) => 1003,

            Error::UserNotFound(_) => 2001,
            Error::EndpointNotConfigured(_) => 2002,
            Error::NoPathsConfigured(_) => 2003,

            Error::SshConnection(_) => 3001,
            Error::SshAuthentication(_) => 3002,
            Error::SshChannel(_) => 3003,

            Error::RemoteCommandFailed(_) => 4001,

            Error::DatabaseError(_) => 6001,
            Error::Internal(_) => 6002,
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::UserNotFound(_)
            | Error::EndpointNotConfigured(_)
            | Error::NoPathsConfigured(_) => StatusCode::NOT_FOUND,

            Error::InvalidRequest(_)
            | Error::InvalidParameter(_)
            | Error::MissingParameter(_) => StatusCode::BAD_REQUEST,

            Error::SshConnection(_) | Error::SshAuthentication(_) | Error::SshChannel(_) => {
                StatusCode::BAD_GATEWAY
            }

            Error::RemoteCommandFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,

            Error::DatabaseError(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: u32,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::SshChannel(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
