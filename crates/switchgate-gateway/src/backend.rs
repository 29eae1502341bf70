//! Account backend - the device cloud behind the gateway
//!
//! The gateway never speaks the plug protocol itself. Everything it needs
//! from the cloud goes through [`AccountBackend`]: checking a login, listing
//! an account's plugs and switching one of them.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::device::{DeviceId, DeviceState, PowerState};
use crate::error::BackendError;
use crate::session::AccountId;

/// Login credentials for a device-cloud account
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Key used for per-user bookkeeping such as login throttling.
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A device as reported by the cloud during listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub device_id: DeviceId,
    pub display_name: String,
    pub state: DeviceState,
    pub online: bool,
}

/// Acknowledgment of an applied command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub device_id: DeviceId,
    /// State the device reported after applying the command
    pub state: PowerState,
}

/// Capability interface to the device cloud
#[async_trait::async_trait]
pub trait AccountBackend: Send + Sync + std::fmt::Debug {
    /// Check credentials, returning the account they belong to
    async fn verify(&self, credentials: &Credentials) -> Result<AccountId, BackendError>;

    /// List the account's devices in the cloud's own order
    async fn list_devices(&self, account_id: &AccountId)
        -> Result<Vec<DeviceSnapshot>, BackendError>;

    /// Switch a device and wait for its acknowledgment
    async fn command(
        &self,
        account_id: &AccountId,
        device_id: &DeviceId,
        state: PowerState,
    ) -> Result<CommandAck, BackendError>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    account_id: String,
}

#[derive(Deserialize)]
struct DeviceListResponse {
    devices: Vec<WireDevice>,
}

#[derive(Deserialize)]
struct WireDevice {
    device_id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    state: Option<PowerState>,
    #[serde(default = "default_online")]
    online: bool,
}

fn default_online() -> bool {
    true
}

impl From<WireDevice> for DeviceSnapshot {
    fn from(d: WireDevice) -> Self {
        Self {
            display_name: d.display_name.unwrap_or_else(|| d.device_id.clone()),
            device_id: DeviceId::new(d.device_id),
            state: d.state.map(DeviceState::from).unwrap_or(DeviceState::Unknown),
            online: d.online,
        }
    }
}

#[derive(Serialize)]
struct StateRequest {
    state: PowerState,
}

#[derive(Deserialize)]
struct StateResponse {
    device_id: String,
    state: PowerState,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: String,
}

/// JSON-over-HTTP client for the device cloud
#[derive(Debug, Clone)]
pub struct HttpAccountBackend {
    base_url: Url,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpAccountBackend {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let base_url = Url::parse(endpoint)
            .map_err(|e| BackendError::Unavailable(format!("bad endpoint {}: {}", endpoint, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Unavailable(format!(
                "endpoint {} cannot carry a path",
                endpoint
            )));
        }
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Self {
            base_url,
            api_key,
            http_client,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn unexpected(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            BackendError::Unavailable(format!("device cloud returned {}: {}", status, text))
        } else {
            BackendError::Protocol(format!("device cloud returned {}: {}", status, text))
        }
    }
}

#[async_trait::async_trait]
impl AccountBackend for HttpAccountBackend {
    async fn verify(&self, credentials: &Credentials) -> Result<AccountId, BackendError> {
        let request = VerifyRequest {
            email: credentials.email.trim(),
            password: &credentials.password,
        };
        let response = self
            .authorize(self.http_client.post(self.url(&["v1", "auth", "verify"])))
            .json(&request)
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => {
                let body: VerifyResponse = response.json().await?;
                Ok(AccountId::new(body.account_id))
            }
            401 | 403 => Err(BackendError::InvalidCredentials),
            _ => Err(Self::unexpected(response).await),
        }
    }

    async fn list_devices(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<DeviceSnapshot>, BackendError> {
        let url = self.url(&["v1", "accounts", account_id.as_str(), "devices"]);
        let response = self.authorize(self.http_client.get(url)).send().await?;

        match response.status().as_u16() {
            200..=299 => {
                let body: DeviceListResponse = response.json().await?;
                Ok(body.devices.into_iter().map(DeviceSnapshot::from).collect())
            }
            504 => Err(BackendError::Timeout),
            _ => Err(Self::unexpected(response).await),
        }
    }

    async fn command(
        &self,
        account_id: &AccountId,
        device_id: &DeviceId,
        state: PowerState,
    ) -> Result<CommandAck, BackendError> {
        let url = self.url(&[
            "v1",
            "accounts",
            account_id.as_str(),
            "devices",
            device_id.as_str(),
            "state",
        ]);
        let response = self
            .authorize(self.http_client.post(url))
            .json(&StateRequest { state })
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => {
                let body: StateResponse = response.json().await?;
                Ok(CommandAck {
                    device_id: DeviceId::new(body.device_id),
                    state: body.state,
                })
            }
            404 => Err(BackendError::NotFound),
            409 | 503 => Err(BackendError::DeviceOffline),
            504 => Err(BackendError::Timeout),
            400..=499 => {
                let text = response.text().await.unwrap_or_default();
                match serde_json::from_str::<ErrorResponse>(&text) {
                    Ok(body) if body.error == "device_offline" => Err(BackendError::DeviceOffline),
                    _ => Err(BackendError::Protocol(text)),
                }
            }
            _ => Err(Self::unexpected(response).await),
        }
    }
}
