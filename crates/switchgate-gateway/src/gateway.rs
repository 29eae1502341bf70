//! Main Gateway implementation
//!
//! HTTP boundary over the auth service, device registry and command
//! dispatcher. Handlers only extract input, call one service operation and
//! map its error kind to a response.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthService;
use crate::backend::{AccountBackend, Credentials, HttpAccountBackend};
use crate::config::{CorsSettings, GatewayConfig};
use crate::device::{Device, DeviceId, DeviceRegistry, PowerState};
use crate::dispatch::CommandDispatcher;
use crate::error::AuthError;
use crate::security::LoginThrottle;
use crate::session::{AccountId, Session, SessionStore};
use crate::{GatewayError, Result};

/// Gateway state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub config: GatewayConfig,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<AuthService>,
    pub registry: Arc<DeviceRegistry>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, backend: Arc<dyn AccountBackend>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let request_timeout = config.backend.request_timeout();

        let sessions = Arc::new(SessionStore::new(
            config.session.ttl(),
            config.session.expired_retention(),
        ));
        let auth = Arc::new(AuthService::new(
            backend.clone(),
            sessions.clone(),
            LoginThrottle::new(config.security.login_attempts_per_minute),
            request_timeout,
        ));
        let registry = Arc::new(DeviceRegistry::new(
            backend.clone(),
            config.devices.freshness_window(),
            request_timeout,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            backend,
            registry.clone(),
            request_timeout,
        ));

        Self {
            config,
            sessions,
            auth,
            registry,
            dispatcher,
            shutdown_tx,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub account_id: AccountId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub state: PowerState,
}

/// Main Gateway
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Create a gateway over an explicit backend
    pub fn new(config: GatewayConfig, backend: Arc<dyn AccountBackend>) -> Self {
        let state = Arc::new(GatewayState::new(config, backend));
        Self { state }
    }

    /// Create a gateway talking HTTP to the configured device cloud
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let backend = HttpAccountBackend::new(
            &config.backend.endpoint,
            config.backend.api_key.clone(),
            config.backend.request_timeout(),
        )
        .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    /// Get gateway state
    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/auth/login", post(Self::handle_login))
            .route("/auth/check", get(Self::handle_check))
            .route("/auth/logout", post(Self::handle_logout))
            .route("/devices", get(Self::handle_list_devices))
            .route("/devices/:device_id/toggle", post(Self::handle_toggle))
            .route("/health", get(Self::handle_health))
            .route("/status", get(Self::handle_status))
            .layer(cors_layer(&self.state.config.cors))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the gateway server
    pub async fn start(&self) -> Result<()> {
        let addr = self.state.config.socket_addr()?;
        let router = self.build_router();
        let sweeper = self.spawn_sweeper();

        tracing::info!("Switchgate gateway starting on {}", addr);
        tracing::info!("Device backend: {}", self.state.config.backend.endpoint);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        let mut shutdown_rx = self.state.shutdown_tx.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_rx.recv() => {}
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Ctrl+C received");
                    }
                }
            })
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        sweeper.abort();
        tracing::info!("Gateway stopped");
        Ok(())
    }

    /// Shutdown the gateway
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
        tracing::info!("Gateway shutdown initiated");
    }

    /// Periodically expire sessions and drop finished throttle windows
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let period = Duration::from_secs(state.config.session.sweep_interval_secs.max(1));
        let mut shutdown_rx = state.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        state.sessions.sweep();
                        state.auth.cleanup();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::debug!("Session sweeper stopped");
        })
    }

    // HTTP handlers

    async fn handle_login(
        State(state): State<Arc<GatewayState>>,
        body: std::result::Result<Json<LoginRequest>, JsonRejection>,
    ) -> Result<Json<LoginResponse>> {
        let Json(request) = body.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
        let credentials = Credentials::new(request.email, request.password);
        let session = state.auth.login(&credentials).await?;

        Ok(Json(LoginResponse {
            token: session.token.as_str().to_string(),
            account_id: session.account_id,
            expires_at: session.expires_at,
        }))
    }

    async fn handle_check(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
    ) -> Result<impl IntoResponse> {
        let token = bearer_token(&headers).ok_or(AuthError::InvalidToken)?;
        let info = state.auth.check(token)?;
        Ok(Json(info))
    }

    async fn handle_logout(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        if let Some(token) = bearer_token(&headers) {
            state.auth.logout(token);
        }
        Json(serde_json::json!({ "ok": true }))
    }

    async fn handle_list_devices(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
        query: std::result::Result<Query<ListQuery>, QueryRejection>,
    ) -> Result<Json<DeviceListResponse>> {
        let session = authenticate(&state, &headers)?;
        let Query(query) = query.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
        if query.refresh {
            state.registry.invalidate(&session.account_id);
        }
        let devices = state.registry.list(&session.account_id).await?;
        Ok(Json(DeviceListResponse { devices }))
    }

    async fn handle_toggle(
        State(state): State<Arc<GatewayState>>,
        headers: HeaderMap,
        Path(device_id): Path<String>,
        body: std::result::Result<Json<ToggleRequest>, JsonRejection>,
    ) -> Result<Json<Device>> {
        let session = authenticate(&state, &headers)?;
        let Json(request) = body.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
        let device = state
            .dispatcher
            .toggle(&session.account_id, &DeviceId::new(device_id), request.state)
            .await?;
        Ok(Json(device))
    }

    async fn handle_health() -> impl IntoResponse {
        Json(serde_json::json!({
            "status": "healthy",
            "version": crate::VERSION
        }))
    }

    async fn handle_status(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
        Json(serde_json::json!({
            "version": crate::VERSION,
            "sessions": state.sessions.len(),
            "active_sessions": state.sessions.active_count(),
            "cached_devices": state.registry.device_count(),
            "commands_in_flight": state.dispatcher.in_flight(),
        }))
    }
}

/// Token from an `Authorization: Bearer` header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn authenticate(state: &GatewayState, headers: &HeaderMap) -> Result<Session> {
    let token = bearer_token(headers).ok_or(AuthError::InvalidToken)?;
    Ok(state.auth.authenticate(token)?)
}

fn cors_layer(settings: &CorsSettings) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if settings.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
