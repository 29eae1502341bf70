//! Session store for authenticated clients
//!
//! Sessions have a fixed lifetime: validating a token never pushes its
//! expiry back. Dead sessions (expired or revoked) are kept for a retention
//! period so a late `check` still reports *why* the token stopped working.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::time::Duration;

use crate::error::AuthError;

/// Number of random bytes behind every token.
const TOKEN_BYTES: usize = 32;

/// Device-cloud account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session token
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh token from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix safe to put in logs.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Borrow<str> for SessionToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionToken({}…)", self.short())
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

/// Server-side record behind a session token
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub account_id: AccountId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl Session {
    fn new(account_id: AccountId, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            token: SessionToken::generate(),
            account_id,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            status: SessionStatus::Active,
        }
    }

    /// Check if session is past its expiry
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Sanitized view, safe to hand back to clients
    pub fn info(&self) -> SessionInfo {
        self.info_at(Utc::now())
    }

    pub fn info_at(&self, now: DateTime<Utc>) -> SessionInfo {
        SessionInfo {
            account_id: self.account_id.clone(),
            status: self.status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            expires_in_secs: (self.expires_at - now).num_seconds().max(0) as u64,
        }
    }
}

/// Session summary info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub account_id: AccountId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: u64,
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Active sessions that were marked expired
    pub expired: usize,
    /// Dead sessions removed from the store
    pub purged: usize,
}

/// Session store - holds every issued session, keyed by token
pub struct SessionStore {
    sessions: DashMap<SessionToken, Session>,
    ttl: chrono::Duration,
    retention: chrono::Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration, retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: to_chrono(ttl),
            retention: to_chrono(retention),
        }
    }

    /// Issue a new active session for an account
    pub fn create(&self, account_id: AccountId) -> Session {
        self.create_at(account_id, Utc::now())
    }

    pub fn create_at(&self, account_id: AccountId, now: DateTime<Utc>) -> Session {
        // Tokens must never be reissued, even for dead sessions still retained.
        let session = loop {
            let candidate = Session::new(account_id.clone(), now, self.ttl);
            if let Entry::Vacant(slot) = self.sessions.entry(candidate.token.clone()) {
                slot.insert(candidate.clone());
                break candidate;
            }
        };
        tracing::info!(
            "Session created: {} for account {}",
            session.token.short(),
            session.account_id
        );
        session
    }

    /// Look up a token and check that it is still usable
    pub fn validate(&self, token: &str) -> Result<Session, AuthError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let mut entry = self.sessions.get_mut(token).ok_or(AuthError::InvalidToken)?;
        let session = entry.value_mut();
        match session.status {
            SessionStatus::Revoked => Err(AuthError::InvalidToken),
            SessionStatus::Expired => Err(AuthError::Expired),
            SessionStatus::Active if session.is_expired_at(now) => {
                session.status = SessionStatus::Expired;
                tracing::debug!("Session expired on validation: {}", session.token.short());
                Err(AuthError::Expired)
            }
            SessionStatus::Active => Ok(session.clone()),
        }
    }

    /// Revoke a token. Unknown and already-revoked tokens are ignored.
    pub fn revoke(&self, token: &str) {
        if let Some(mut entry) = self.sessions.get_mut(token) {
            let session = entry.value_mut();
            if session.status != SessionStatus::Revoked {
                session.status = SessionStatus::Revoked;
                tracing::info!("Session revoked: {}", session.token.short());
            }
        }
    }

    /// Mark overdue sessions expired and purge dead ones past retention
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let retention = self.retention;
        self.sessions.retain(|_, session| {
            if session.status == SessionStatus::Active && session.is_expired_at(now) {
                session.status = SessionStatus::Expired;
                report.expired += 1;
            }
            let dead = session.status != SessionStatus::Active;
            let purge_at = session.expires_at.checked_add_signed(retention);
            if dead && purge_at.map_or(false, |at| now >= at) {
                report.purged += 1;
                return false;
            }
            true
        });
        if report.expired > 0 || report.purged > 0 {
            tracing::info!(
                "Session sweep: {} expired, {} purged",
                report.expired,
                report.purged
            );
        }
        report
    }

    /// Total records held, dead ones included
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions that would currently validate
    pub fn active_count(&self) -> usize {
        let now = Utc::now();
        self.sessions
            .iter()
            .filter(|e| e.status == SessionStatus::Active && !e.is_expired_at(now))
            .count()
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}
