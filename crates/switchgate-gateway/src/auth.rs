//! Auth service - login, session check and logout

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AccountBackend, Credentials};
use crate::error::{AuthError, BackendError};
use crate::security::LoginThrottle;
use crate::session::{Session, SessionInfo, SessionStore};

pub struct AuthService {
    backend: Arc<dyn AccountBackend>,
    sessions: Arc<SessionStore>,
    throttle: LoginThrottle,
    request_timeout: Duration,
}

impl AuthService {
    pub fn new(
        backend: Arc<dyn AccountBackend>,
        sessions: Arc<SessionStore>,
        throttle: LoginThrottle,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            sessions,
            throttle,
            request_timeout,
        }
    }

    /// Verify credentials with the account backend and open a session
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let key = credentials.normalized_email();
        if key.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        self.throttle.check(&key)?;

        let verified = tokio::time::timeout(self.request_timeout, self.backend.verify(credentials))
            .await
            .map_err(|_| AuthError::BackendUnavailable("credential check timed out".to_string()))?;

        let account_id = match verified {
            Ok(account_id) => account_id,
            Err(BackendError::InvalidCredentials) => {
                tracing::info!("Login rejected for {}", key);
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                tracing::warn!("Credential check failed for {}: {}", key, e);
                return Err(AuthError::BackendUnavailable(e.to_string()));
            }
        };

        self.throttle.reset(&key);
        Ok(self.sessions.create(account_id))
    }

    /// Report whether a token is still usable
    pub fn check(&self, token: &str) -> Result<SessionInfo, AuthError> {
        self.sessions.validate(token).map(|s| s.info())
    }

    /// Resolve a token to its session, for the device routes
    pub fn authenticate(&self, token: &str) -> Result<Session, AuthError> {
        self.sessions.validate(token)
    }

    /// End a session. Never fails, whatever the token.
    pub fn logout(&self, token: &str) {
        self.sessions.revoke(token);
    }

    /// Periodic housekeeping for the throttle
    pub fn cleanup(&self) {
        self.throttle.cleanup();
    }
}
