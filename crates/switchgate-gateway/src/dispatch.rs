//! Command dispatcher - single-flight toggles against the device backend
//!
//! At most one command per device is in flight from this gateway. A second
//! toggle for a busy device is rejected with `Conflict` straight away rather
//! than queued. Failed commands are never retried.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::backend::AccountBackend;
use crate::device::{Device, DeviceId, DeviceRegistry, DeviceState, PowerState};
use crate::error::{BackendError, DispatchError};
use crate::session::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Pending,
    Acked,
    Failed,
}

/// One toggle request, alive for a single backend round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub requested_state: PowerState,
    pub issued_at: DateTime<Utc>,
    pub outcome: CommandOutcome,
}

impl Command {
    pub fn new(device_id: DeviceId, requested_state: PowerState) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            requested_state,
            issued_at: Utc::now(),
            outcome: CommandOutcome::Pending,
        }
    }

    fn resolve(&mut self, outcome: CommandOutcome) {
        self.outcome = outcome;
        let elapsed_ms = (Utc::now() - self.issued_at).num_milliseconds();
        match outcome {
            CommandOutcome::Acked => tracing::info!(
                "Command {} acked: {} -> {} in {}ms",
                self.id,
                self.device_id,
                self.requested_state,
                elapsed_ms
            ),
            _ => tracing::warn!(
                "Command {} {:?}: {} -> {} after {}ms",
                self.id,
                outcome,
                self.device_id,
                self.requested_state,
                elapsed_ms
            ),
        }
    }
}

/// Holds a device's in-flight slot; the slot is freed on drop
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<DeviceId, Uuid>,
    device_id: DeviceId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.device_id);
    }
}

pub struct CommandDispatcher {
    backend: Arc<dyn AccountBackend>,
    registry: Arc<DeviceRegistry>,
    in_flight: DashMap<DeviceId, Uuid>,
    request_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        backend: Arc<dyn AccountBackend>,
        registry: Arc<DeviceRegistry>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            registry,
            in_flight: DashMap::new(),
            request_timeout,
        }
    }

    /// Switch a device of `account_id` and return its updated record.
    ///
    /// The lookup and the backend command share one `request_timeout`
    /// deadline. On any failure the cached device is left exactly as it was.
    pub async fn toggle(
        &self,
        account_id: &AccountId,
        device_id: &DeviceId,
        requested_state: PowerState,
    ) -> Result<Device, DispatchError> {
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let device = self.registry.resolve(account_id, device_id, deadline).await?;

        let mut command = Command::new(device_id.clone(), requested_state);
        let _guard = self.acquire(device_id, command.id)?;
        tracing::debug!(
            "Command {} issued: {} -> {}",
            command.id,
            device_id,
            requested_state
        );

        let result = tokio::time::timeout_at(
            deadline,
            self.backend.command(account_id, device_id, requested_state),
        )
        .await;

        match result {
            Ok(Ok(ack)) if &ack.device_id != device_id => {
                command.resolve(CommandOutcome::Failed);
                Err(DispatchError::Backend(format!(
                    "acknowledgment for {} while switching {}",
                    ack.device_id, device_id
                )))
            }
            Ok(Ok(ack)) => {
                command.resolve(CommandOutcome::Acked);
                // Prefer the current record in case a refresh landed meanwhile.
                let mut updated = self.registry.peek(device_id).unwrap_or(device);
                updated.last_known_state = DeviceState::from(ack.state);
                updated.last_seen_at = Some(Utc::now());
                updated.online = true;
                self.registry.upsert(updated.clone());
                Ok(updated)
            }
            Ok(Err(e)) => {
                command.resolve(CommandOutcome::Failed);
                Err(command_error(device_id, e))
            }
            Err(_) => {
                command.resolve(CommandOutcome::Failed);
                Err(DispatchError::Timeout(device_id.to_string()))
            }
        }
    }

    /// Devices with a command currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn acquire(
        &self,
        device_id: &DeviceId,
        command_id: Uuid,
    ) -> Result<InFlightGuard<'_>, DispatchError> {
        match self.in_flight.entry(device_id.clone()) {
            Entry::Occupied(pending) => {
                tracing::info!(
                    "Toggle for {} rejected, command {} still pending",
                    device_id,
                    pending.get()
                );
                Err(DispatchError::Conflict(device_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(command_id);
                Ok(InFlightGuard {
                    in_flight: &self.in_flight,
                    device_id: device_id.clone(),
                })
            }
        }
    }
}

fn command_error(device_id: &DeviceId, err: BackendError) -> DispatchError {
    match err {
        BackendError::DeviceOffline => DispatchError::DeviceOffline(device_id.to_string()),
        BackendError::Timeout => DispatchError::Timeout(device_id.to_string()),
        BackendError::NotFound => DispatchError::NotFound(device_id.to_string()),
        other => DispatchError::Backend(other.to_string()),
    }
}
