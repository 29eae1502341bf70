//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::{GatewayError, Result, DEFAULT_HOST, DEFAULT_PORT};

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Device cloud connection
    pub backend: BackendSettings,

    /// Session configuration
    pub session: SessionSettings,

    /// Device cache configuration
    pub devices: DeviceSettings,

    /// Security configuration
    pub security: SecuritySettings,

    /// CORS configuration
    pub cors: CorsSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backend: BackendSettings::default(),
            session: SessionSettings::default(),
            devices: DeviceSettings::default(),
            security: SecuritySettings::default(),
            cors: CorsSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the device cloud endpoint
    pub fn with_backend_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.backend.endpoint = endpoint.into();
        self
    }

    /// Set the per-call backend deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.backend.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the session lifetime
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session.ttl_secs = ttl.as_secs();
        self
    }

    /// Set the device-list freshness window
    pub fn with_cache_freshness(mut self, window: Duration) -> Self {
        self.devices.cache_freshness_secs = window.as_secs();
        self
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| GatewayError::InvalidConfig(format!("bad listen address: {}", e)))
    }

    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Apply `SWITCHGATE_*` environment overrides on top of this config.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(v) = std::env::var("SWITCHGATE_HOST") {
            self.host = v;
        }
        if let Some(v) = env_number("SWITCHGATE_PORT")? {
            self.port = v;
        }
        if let Ok(v) = std::env::var("SWITCHGATE_BACKEND_ENDPOINT") {
            self.backend.endpoint = v;
        }
        if let Ok(v) = std::env::var("SWITCHGATE_BACKEND_API_KEY") {
            self.backend.api_key = Some(v);
        }
        if let Some(v) = env_number("SWITCHGATE_REQUEST_TIMEOUT_SECS")? {
            self.backend.request_timeout_secs = v;
        }
        if let Some(v) = env_number("SWITCHGATE_SESSION_TTL_SECS")? {
            self.session.ttl_secs = v;
        }
        if let Some(v) = env_number("SWITCHGATE_CACHE_FRESHNESS_SECS")? {
            self.devices.cache_freshness_secs = v;
        }
        Ok(self)
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.backend.endpoint.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "backend endpoint is required".to_string(),
            ));
        }
        url::Url::parse(&self.backend.endpoint).map_err(|e| {
            GatewayError::InvalidConfig(format!(
                "backend endpoint '{}' is not a valid URL: {}",
                self.backend.endpoint, e
            ))
        })?;
        if self.backend.request_timeout_secs == 0 {
            return Err(GatewayError::InvalidConfig(
                "request timeout must be at least one second".to_string(),
            ));
        }
        if self.session.ttl_secs == 0 {
            return Err(GatewayError::InvalidConfig(
                "session ttl must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| GatewayError::InvalidConfig(format!("{} is not a number: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Device cloud settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL of the device cloud API
    pub endpoint: String,

    /// Bearer key presented to the device cloud (optional)
    pub api_key: Option<String>,

    /// Per-call deadline in seconds
    pub request_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            request_timeout_secs: 10,
        }
    }
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Session lifetime in seconds
    pub ttl_secs: u64,

    /// How often the expiry sweep runs
    pub sweep_interval_secs: u64,

    /// How long dead sessions are remembered before being purged
    pub expired_retention_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400, // 24 hours
            sweep_interval_secs: 60,
            expired_retention_secs: 3600,
        }
    }
}

impl SessionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn expired_retention(&self) -> Duration {
        Duration::from_secs(self.expired_retention_secs)
    }
}

/// Device cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Maximum age of a cached device list before it is refetched
    pub cache_freshness_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            cache_freshness_secs: 30,
        }
    }
}

impl DeviceSettings {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.cache_freshness_secs)
    }
}

/// Security settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Login attempts allowed per username per minute (0 disables the limit)
    pub login_attempts_per_minute: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            login_attempts_per_minute: 10,
        }
    }
}

/// CORS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    /// Allowed origins; `"*"` allows any origin
    pub allowed_origins: Vec<String>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl CorsSettings {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}
