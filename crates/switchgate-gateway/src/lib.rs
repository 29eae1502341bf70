//! Switchgate Gateway - session-authenticated smart plug control
//!
//! This crate fronts a smart-plug device cloud. Clients log in with their
//! cloud account, receive an opaque session token, and then list and toggle
//! their plugs through the gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Switchgate Gateway                    │
//! ├──────────────────────────────────────────────────────────┤
//! │   /auth/login   /auth/check   /auth/logout               │
//! │   /devices      /devices/:id/toggle                      │
//! │        │                 │                    │          │
//! │  ┌─────▼──────┐   ┌──────▼───────┐   ┌────────▼───────┐  │
//! │  │    Auth    │   │    Device    │◄──┤    Command     │  │
//! │  │  Service   │   │   Registry   │   │   Dispatcher   │  │
//! │  └─────┬──────┘   └──────┬───────┘   └────────┬───────┘  │
//! │  ┌─────▼──────┐          │                    │          │
//! │  │  Session   │          │                    │          │
//! │  │   Store    │          │                    │          │
//! │  └────────────┘          │                    │          │
//! │                  ┌───────▼────────────────────▼───────┐  │
//! │                  │          AccountBackend            │  │
//! │                  └───────────────┬────────────────────┘  │
//! └──────────────────────────────────┼───────────────────────┘
//!                                    ▼
//!                              device cloud
//! ```
//!
//! # Features
//!
//! - **Fixed-TTL sessions**: random opaque tokens, expiry distinct from invalid
//! - **Device cache**: backend order preserved, freshness window, stale fallback
//! - **Single-flight toggles**: concurrent toggles of one plug get `Conflict`
//! - **Login throttling**: per-username attempt window

pub mod auth;
pub mod backend;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod security;
pub mod session;

pub use auth::AuthService;
pub use backend::{AccountBackend, CommandAck, Credentials, DeviceSnapshot, HttpAccountBackend};
pub use config::GatewayConfig;
pub use device::{Device, DeviceId, DeviceRegistry, DeviceState, PowerState};
pub use dispatch::{Command, CommandDispatcher, CommandOutcome};
pub use error::{AuthError, BackendError, DispatchError, GatewayError, Result};
pub use gateway::{Gateway, GatewayState};
pub use security::LoginThrottle;
pub use session::{AccountId, Session, SessionInfo, SessionStatus, SessionStore, SessionToken};

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 4449;

/// Default host
pub const DEFAULT_HOST: &str = "0.0.0.0";
