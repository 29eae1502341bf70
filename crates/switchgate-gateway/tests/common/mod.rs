//! Shared fake device cloud for integration tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchgate_gateway::{
    AccountBackend, AccountId, BackendError, CommandAck, Credentials, DeviceId, DeviceSnapshot,
    DeviceState, Gateway, GatewayConfig, PowerState,
};
use tokio::sync::Notify;
use tower::ServiceExt;

/// In-memory device cloud with call counters and a gate to hold commands
#[derive(Debug, Default)]
pub struct FakeCloud {
    users: Mutex<HashMap<String, (String, AccountId)>>,
    devices: Mutex<HashMap<AccountId, Vec<DeviceSnapshot>>>,
    offline: Mutex<HashSet<DeviceId>>,
    pub list_calls: AtomicUsize,
    pub command_calls: AtomicUsize,
    pub list_fails: AtomicBool,
    hold_commands: AtomicBool,
    /// Signalled when a held command reaches the cloud
    pub entered: Notify,
    /// Releases one held command
    pub gate: Notify,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, email: &str, password: &str, account: &str) {
        self.users
            .lock()
            .insert(email.to_string(), (password.to_string(), AccountId::new(account)));
    }

    pub fn add_device(&self, account: &str, device: &str, state: DeviceState) {
        self.devices
            .lock()
            .entry(AccountId::new(account))
            .or_default()
            .push(DeviceSnapshot {
                device_id: DeviceId::new(device),
                display_name: format!("Plug {}", device),
                state,
                online: true,
            });
    }

    pub fn set_offline(&self, device: &str) {
        self.offline.lock().insert(DeviceId::new(device));
    }

    pub fn hold_commands(&self, hold: bool) {
        self.hold_commands.store(hold, Ordering::SeqCst);
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> usize {
        self.command_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AccountBackend for FakeCloud {
    async fn verify(&self, credentials: &Credentials) -> Result<AccountId, BackendError> {
        match self.users.lock().get(&credentials.normalized_email()) {
            Some((password, account)) if *password == credentials.password => Ok(account.clone()),
            _ => Err(BackendError::InvalidCredentials),
        }
    }

    async fn list_devices(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<DeviceSnapshot>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("cloud down".into()));
        }
        Ok(self
            .devices
            .lock()
            .get(account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn command(
        &self,
        _account_id: &AccountId,
        device_id: &DeviceId,
        state: PowerState,
    ) -> Result<CommandAck, BackendError> {
        self.command_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_commands.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        if self.offline.lock().contains(device_id) {
            return Err(BackendError::DeviceOffline);
        }
        Ok(CommandAck {
            device_id: device_id.clone(),
            state,
        })
    }
}

/// Config suitable for tests: long cache window, short backend deadline
pub fn test_config() -> GatewayConfig {
    GatewayConfig::default()
        .with_backend_endpoint("http://127.0.0.1:9")
        .with_request_timeout(Duration::from_secs(2))
        .with_session_ttl(Duration::from_secs(3600))
        .with_cache_freshness(Duration::from_secs(60))
}

pub fn router(cloud: Arc<FakeCloud>, config: GatewayConfig) -> Router {
    Gateway::new(config, cloud).build_router()
}

/// Send one request and decode the JSON response
pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

pub async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/auth/login",
        None,
        Some(serde_json::json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["token"].as_str().expect("token").to_string()
}
