//! Device registry - per-account cache of plugs and their last known state
//!
//! A list is served from cache while it is younger than the freshness
//! window, otherwise it is refetched from the backend. When that refetch
//! fails the stale copy is served instead.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{AccountBackend, DeviceSnapshot};
use crate::error::{BackendError, DispatchError};
use crate::session::AccountId;

/// Device identifier as assigned by the cloud
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A state a device can be switched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
        }
    }
}

/// Last observed state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    On,
    Off,
    Unknown,
}

impl From<PowerState> for DeviceState {
    fn from(state: PowerState) -> Self {
        match state {
            PowerState::On => DeviceState::On,
            PowerState::Off => DeviceState::Off,
        }
    }
}

/// A plug known to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub account_id: AccountId,
    pub display_name: String,
    pub last_known_state: DeviceState,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub online: bool,
}

impl Device {
    /// A device that has never been observed
    pub fn new(
        device_id: DeviceId,
        account_id: AccountId,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            account_id,
            display_name: display_name.into(),
            last_known_state: DeviceState::Unknown,
            last_seen_at: None,
            online: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedDevice {
    device: Device,
    refreshed_at: Instant,
}

#[derive(Debug, Default)]
struct AccountListing {
    /// Device ids in the order the backend reported them
    order: Vec<DeviceId>,
    /// `None` until the first successful fetch
    fetched_at: Option<Instant>,
    /// Set by `invalidate`; the next list goes to the backend
    forced: bool,
    /// Most recent failed refresh, shared with callers queued behind it
    last_failure: Option<(Instant, DispatchError)>,
}

/// Device registry - shared cache of every account's devices
pub struct DeviceRegistry {
    backend: Arc<dyn AccountBackend>,
    devices: DashMap<DeviceId, CachedDevice>,
    listings: DashMap<AccountId, AccountListing>,
    refresh_locks: DashMap<AccountId, Arc<tokio::sync::Mutex<()>>>,
    freshness: Duration,
    request_timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(
        backend: Arc<dyn AccountBackend>,
        freshness: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            devices: DashMap::new(),
            listings: DashMap::new(),
            refresh_locks: DashMap::new(),
            freshness,
            request_timeout,
        }
    }

    /// Devices of an account, in backend order
    pub async fn list(&self, account_id: &AccountId) -> Result<Vec<Device>, DispatchError> {
        if let Some(devices) = self.cached_listing(account_id, true) {
            tracing::debug!("Device list cache hit for {}", account_id);
            return Ok(devices);
        }

        match self.refresh(account_id).await {
            Ok(devices) => Ok(devices),
            Err(e) => match self.cached_listing(account_id, false) {
                Some(stale) => {
                    tracing::warn!(
                        "Device refresh for {} failed, serving stale list: {}",
                        account_id,
                        e
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Look up a single device, refreshing its account first if it is stale
    pub async fn get(&self, device_id: &DeviceId) -> Result<Device, DispatchError> {
        let (device, stale) = self
            .devices
            .get(device_id)
            .map(|c| (c.device.clone(), c.refreshed_at.elapsed() > self.freshness))
            .ok_or_else(|| DispatchError::NotFound(device_id.to_string()))?;

        if !stale {
            return Ok(device);
        }

        match self.refresh(&device.account_id).await {
            Ok(_) => self
                .peek(device_id)
                .ok_or_else(|| DispatchError::NotFound(device_id.to_string())),
            Err(e) => {
                tracing::warn!(
                    "Refresh for device {} failed, using cached record: {}",
                    device_id,
                    e
                );
                Ok(device)
            }
        }
    }

    /// Look up a device that must belong to `account_id`.
    ///
    /// Devices of other accounts are reported as not found.
    pub async fn get_for_account(
        &self,
        account_id: &AccountId,
        device_id: &DeviceId,
    ) -> Result<Device, DispatchError> {
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        self.resolve(account_id, device_id, deadline).await
    }

    /// Ownership lookup that gives up at `deadline`.
    ///
    /// A cached record is used however old it is. Only a cache miss goes to
    /// the backend, to pick up devices added since the last listing.
    pub async fn resolve(
        &self,
        account_id: &AccountId,
        device_id: &DeviceId,
        deadline: tokio::time::Instant,
    ) -> Result<Device, DispatchError> {
        let device = match self.peek(device_id) {
            Some(device) => device,
            None => {
                self.refresh_until(account_id, deadline, true).await?;
                self.peek(device_id)
                    .ok_or_else(|| DispatchError::NotFound(device_id.to_string()))?
            }
        };

        if &device.account_id != account_id {
            return Err(DispatchError::NotFound(device_id.to_string()));
        }
        Ok(device)
    }

    /// Cached record without any refresh
    pub fn peek(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices.get(device_id).map(|c| c.device.clone())
    }

    /// Record a freshly observed device
    pub fn upsert(&self, device: Device) {
        let device_id = device.device_id.clone();
        let account_id = device.account_id.clone();
        self.devices.insert(
            device_id.clone(),
            CachedDevice {
                device,
                refreshed_at: Instant::now(),
            },
        );

        let mut listing = self.listings.entry(account_id).or_default();
        if !listing.order.contains(&device_id) {
            listing.order.push(device_id);
        }
    }

    /// Force the next `list` for this account to go to the backend
    pub fn invalidate(&self, account_id: &AccountId) {
        if let Some(mut listing) = self.listings.get_mut(account_id) {
            listing.forced = true;
        }
    }

    /// Number of cached devices across all accounts
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn cached_listing(&self, account_id: &AccountId, fresh_only: bool) -> Option<Vec<Device>> {
        let order = {
            let listing = self.listings.get(account_id)?;
            let fetched_at = listing.fetched_at?;
            if fresh_only && (listing.forced || fetched_at.elapsed() > self.freshness) {
                return None;
            }
            listing.order.clone()
        };

        Some(
            order
                .iter()
                .filter_map(|id| self.devices.get(id).map(|c| c.device.clone()))
                .collect(),
        )
    }

    async fn refresh(&self, account_id: &AccountId) -> Result<Vec<Device>, DispatchError> {
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        self.refresh_until(account_id, deadline, false).await
    }

    /// Refetch an account's devices, waiting for the lock and the backend
    /// together no later than `deadline`.
    ///
    /// Callers queued behind a refresh take its outcome instead of issuing
    /// their own backend call. `force` skips the freshness shortcut.
    async fn refresh_until(
        &self,
        account_id: &AccountId,
        deadline: tokio::time::Instant,
        force: bool,
    ) -> Result<Vec<Device>, DispatchError> {
        let requested_at = Instant::now();
        let lock = self
            .refresh_locks
            .entry(account_id.clone())
            .or_default()
            .value()
            .clone();
        let _guard = tokio::time::timeout_at(deadline, lock.lock())
            .await
            .map_err(|_| DispatchError::Timeout(format!("device list for {}", account_id)))?;

        if let Some(devices) = self.fetched_since(account_id, requested_at) {
            return Ok(devices);
        }
        if !force {
            if let Some(devices) = self.cached_listing(account_id, true) {
                return Ok(devices);
            }
        }
        if let Some(err) = self.failed_since(account_id, requested_at) {
            tracing::debug!("Reusing failed refresh for {}: {}", account_id, err);
            return Err(err);
        }

        tracing::debug!("Refreshing device list for {}", account_id);
        let err = match tokio::time::timeout_at(deadline, self.backend.list_devices(account_id))
            .await
        {
            Ok(Ok(snapshots)) => return Ok(self.merge(account_id, snapshots)),
            Ok(Err(e)) => listing_error(account_id, e),
            Err(_) => DispatchError::Timeout(format!("device list for {}", account_id)),
        };

        self.listings.entry(account_id.clone()).or_default().last_failure =
            Some((Instant::now(), err.clone()));
        Err(err)
    }

    fn fetched_since(&self, account_id: &AccountId, since: Instant) -> Option<Vec<Device>> {
        let fetched_at = self.listings.get(account_id)?.fetched_at?;
        if fetched_at < since {
            return None;
        }
        self.cached_listing(account_id, false)
    }

    fn failed_since(&self, account_id: &AccountId, since: Instant) -> Option<DispatchError> {
        let listing = self.listings.get(account_id)?;
        match &listing.last_failure {
            Some((failed_at, err)) if *failed_at >= since => Some(err.clone()),
            _ => None,
        }
    }

    fn merge(&self, account_id: &AccountId, snapshots: Vec<DeviceSnapshot>) -> Vec<Device> {
        let now = Instant::now();
        let seen_at = Utc::now();
        let mut order = Vec::with_capacity(snapshots.len());
        let mut devices = Vec::with_capacity(snapshots.len());

        for snapshot in snapshots {
            let previous = self.peek(&snapshot.device_id);
            let mut device = previous.unwrap_or_else(|| {
                Device::new(snapshot.device_id.clone(), account_id.clone(), "")
            });
            device.account_id = account_id.clone();
            device.display_name = snapshot.display_name;
            device.online = snapshot.online;
            // An unreported state keeps whatever was observed last.
            if snapshot.state != DeviceState::Unknown {
                device.last_known_state = snapshot.state;
            }
            if snapshot.online {
                device.last_seen_at = Some(seen_at);
            }

            self.devices.insert(
                snapshot.device_id.clone(),
                CachedDevice {
                    device: device.clone(),
                    refreshed_at: now,
                },
            );
            order.push(snapshot.device_id);
            devices.push(device);
        }

        let dropped: Vec<DeviceId> = {
            let mut listing = self.listings.entry(account_id.clone()).or_default();
            let dropped = listing
                .order
                .iter()
                .filter(|id| !order.contains(id))
                .cloned()
                .collect();
            listing.order = order;
            listing.fetched_at = Some(now);
            listing.forced = false;
            listing.last_failure = None;
            dropped
        };
        for id in dropped {
            self.devices
                .remove_if(&id, |_, cached| &cached.device.account_id == account_id);
        }

        devices
    }
}

fn listing_error(account_id: &AccountId, err: BackendError) -> DispatchError {
    match err {
        BackendError::Timeout => DispatchError::Timeout(format!("device list for {}", account_id)),
        other => DispatchError::Backend(other.to_string()),
    }
}
