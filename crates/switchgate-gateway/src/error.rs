//! Error types for the Gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Session and credential failures.
///
/// `InvalidCredentials` and `Expired` are kept apart so a client can tell
/// "wrong password" from "log in again".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid session token")]
    InvalidToken,

    #[error("session has expired")]
    Expired,

    #[error("too many login attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("account backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Device listing and command failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("device is offline: {0}")]
    DeviceOffline(String),

    #[error("device backend timed out: {0}")]
    Timeout(String),

    #[error("a command is already pending for device {0}")]
    Conflict(String),

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device backend error: {0}")]
    Backend(String),
}

/// Failures reported by an [`AccountBackend`](crate::backend::AccountBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("credentials rejected by backend")]
    InvalidCredentials,

    #[error("device is offline")]
    DeviceOffline,

    #[error("unknown device")]
    NotFound,

    #[error("backend request timed out")]
    Timeout,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected backend response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Protocol(e.to_string())
        } else {
            BackendError::Unavailable(e.to_string())
        }
    }
}

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl GatewayError {
    /// HTTP status and stable machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::Auth(e) => match e {
                AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
                AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
                AuthError::Expired => (StatusCode::UNAUTHORIZED, "session_expired"),
                AuthError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
                AuthError::BackendUnavailable(_) => (StatusCode::BAD_GATEWAY, "backend_unavailable"),
            },
            GatewayError::Dispatch(e) => match e {
                DispatchError::DeviceOffline(_) => (StatusCode::SERVICE_UNAVAILABLE, "device_offline"),
                DispatchError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                DispatchError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                DispatchError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                DispatchError::Backend(_) => (StatusCode::BAD_GATEWAY, "backend_error"),
            },
            GatewayError::BadRequest(_) | GatewayError::Serialization(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            GatewayError::InvalidConfig(_) | GatewayError::Io(_) | GatewayError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("Request failed: {}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}

/// Result type for Gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_map_to_distinct_codes() {
        let expired = GatewayError::from(AuthError::Expired).status_and_code();
        let invalid = GatewayError::from(AuthError::InvalidToken).status_and_code();
        let creds = GatewayError::from(AuthError::InvalidCredentials).status_and_code();

        assert_eq!(expired, (StatusCode::UNAUTHORIZED, "session_expired"));
        assert_eq!(invalid, (StatusCode::UNAUTHORIZED, "invalid_token"));
        assert_eq!(creds, (StatusCode::UNAUTHORIZED, "invalid_credentials"));
    }

    #[test]
    fn test_dispatch_error_statuses() {
        let cases = [
            (DispatchError::Conflict("d1".into()), StatusCode::CONFLICT),
            (DispatchError::NotFound("d1".into()), StatusCode::NOT_FOUND),
            (DispatchError::Timeout("d1".into()), StatusCode::GATEWAY_TIMEOUT),
            (DispatchError::DeviceOffline("d1".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(GatewayError::from(err).status_and_code().0, status);
        }
    }

    #[test]
    fn test_internal_error_hides_details() {
        let response = GatewayError::Internal("secret detail".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
