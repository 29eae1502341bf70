//! Login throttling
//!
//! Fixed one-minute windows per username. A successful login clears the
//! user's window so a typo followed by the right password is not punished.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::AuthError;

/// Length of one throttling window
const WINDOW: Duration = Duration::from_secs(60);

/// Attempt counter for one username
#[derive(Debug, Clone)]
struct AttemptWindow {
    count: u32,
    window_start: Instant,
}

impl AttemptWindow {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn is_expired(&self, window: Duration) -> bool {
        self.window_start.elapsed() > window
    }

    fn retry_after(&self, window: Duration) -> Duration {
        window.saturating_sub(self.window_start.elapsed())
    }
}

/// Per-username login attempt limiter
pub struct LoginThrottle {
    attempts: RwLock<HashMap<String, AttemptWindow>>,
    /// Attempts allowed per window; zero disables throttling
    limit: u32,
    window: Duration,
}

impl LoginThrottle {
    pub fn new(attempts_per_minute: u32) -> Self {
        Self::with_window(attempts_per_minute, WINDOW)
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Count one attempt for `key`, failing once the window is used up
    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        if self.limit == 0 {
            return Ok(());
        }

        let mut attempts = self.attempts.write();
        let entry = attempts
            .entry(key.to_string())
            .or_insert_with(AttemptWindow::new);
        if entry.is_expired(self.window) {
            *entry = AttemptWindow::new();
        }

        if entry.count >= self.limit {
            let wait = entry.retry_after(self.window);
            let retry_after_secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            tracing::warn!("Login throttled for {}", key);
            return Err(AuthError::RateLimited { retry_after_secs });
        }

        entry.count += 1;
        Ok(())
    }

    /// Forget the attempts made for `key`
    pub fn reset(&self, key: &str) {
        self.attempts.write().remove(key);
    }

    /// Attempts counted in the current window
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts
            .read()
            .get(key)
            .filter(|e| !e.is_expired(self.window))
            .map(|e| e.count)
            .unwrap_or(0)
    }

    /// Drop finished windows
    pub fn cleanup(&self) {
        let window = self.window;
        self.attempts.write().retain(|_, e| !e.is_expired(window));
    }
}
