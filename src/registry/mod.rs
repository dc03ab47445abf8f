//! Reader device registry.
//!
//! Authoritative map from device ID to liveness record, fed by the three
//! inbound reader topics. The registry owns no bonding logic: taps are
//! forwarded to whatever handler the hub installs.
//!
//! All operations take the registry lock once: shared for snapshots,
//! exclusive for writes. The tap handler runs after the lock is released.

pub mod sweeper;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use sweeper::run_liveness_sweeper;
pub use types::{Device, DeviceStatus, RegisterMessage, StatusMessage, TapMessage};

pub const TOPIC_REGISTER: &str = "fiz/register";
pub const TOPIC_STATUS: &str = "fiz/status";
pub const TOPIC_TAP: &str = "fiz/uid";

/// Callback receiving every decoded tap.
pub type TapHandler = Arc<dyn Fn(&TapMessage) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("malformed {topic} payload: {reason}")]
    MalformedMessage { topic: String, reason: String },
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}

impl RegistryError {
    fn malformed(topic: &str, reason: impl ToString) -> Self {
        RegistryError::MalformedMessage {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Registry of known readers.
pub struct DeviceRegistry {
    /// Device ID -> record. Shared for snapshots, exclusive for writes.
    devices: RwLock<HashMap<String, Device>>,
    /// Receives every decoded tap; installed by the hub.
    tap_handler: RwLock<Option<TapHandler>>,
    /// Silence after which an online device is demoted.
    liveness_timeout: Duration,
}

impl DeviceRegistry {
    /// Empty registry demoting devices silent for `liveness_timeout`.
    pub fn new(liveness_timeout: Duration) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            tap_handler: RwLock::new(None),
            liveness_timeout,
        }
    }

    pub fn liveness_timeout(&self) -> Duration {
        self.liveness_timeout
    }

    /// Install the handler that receives forwarded taps.
    pub fn set_tap_handler(&self, handler: TapHandler) {
        *self
            .tap_handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Route one inbound transport message by topic.
    ///
    /// Malformed payloads are returned as errors; the caller logs and drops them.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<(), RegistryError> {
        match topic {
            TOPIC_REGISTER => self.handle_register(payload).map(|_| ()),
            TOPIC_STATUS => {
                let msg: StatusMessage = serde_json::from_slice(payload)
                    .map_err(|e| RegistryError::malformed(topic, e))?;
                self.handle_status(&msg.device_id, msg.status, msg.rssi);
                Ok(())
            }
            TOPIC_TAP => {
                let msg: TapMessage = serde_json::from_slice(payload)
                    .map_err(|e| RegistryError::malformed(topic, e))?;
                if msg.uid.is_empty() {
                    return Err(RegistryError::malformed(topic, "empty uid"));
                }
                self.handle_tap(&msg);
                Ok(())
            }
            other => Err(RegistryError::UnknownTopic(other.to_string())),
        }
    }

    /// Decode a registration payload and upsert the device as online.
    pub fn handle_register(&self, payload: &[u8]) -> Result<Device, RegistryError> {
        let msg: RegisterMessage = serde_json::from_slice(payload)
            .map_err(|e| RegistryError::malformed(TOPIC_REGISTER, e))?;
        if msg.device_id.is_empty() {
            return Err(RegistryError::malformed(TOPIC_REGISTER, "empty device_id"));
        }
        Ok(self.register_at(msg, Utc::now()))
    }

    /// Upsert a device from a decoded registration. Re-registration updates
    /// the existing record in place and keeps the last known signal strength.
    pub fn register_at(&self, msg: RegisterMessage, now: DateTime<Utc>) -> Device {
        let mut devices = self.write();
        let signal_strength = devices
            .get(&msg.device_id)
            .map(|d| d.signal_strength)
            .unwrap_or(0);
        let device = Device {
            device_id: msg.device_id,
            device_type: msg.device_type,
            firmware_version: msg.firmware,
            ip_address: msg.ip,
            status: DeviceStatus::Online,
            signal_strength,
            last_seen: now,
        };
        devices.insert(device.device_id.clone(), device.clone());
        log::info!(
            "Registered device: {} ({})",
            device.device_id,
            device.ip_address
        );
        device
    }

    /// Apply a status report. Unknown devices are ignored: a reader must
    /// register before its status is tracked. Returns whether it applied.
    pub fn handle_status(&self, device_id: &str, status: DeviceStatus, rssi: i32) -> bool {
        self.status_at(device_id, status, rssi, Utc::now())
    }

    pub fn status_at(
        &self,
        device_id: &str,
        status: DeviceStatus,
        rssi: i32,
        now: DateTime<Utc>,
    ) -> bool {
        let mut devices = self.write();
        match devices.get_mut(device_id) {
            Some(device) => {
                log::debug!(
                    "Device {} reported {} (rssi {})",
                    device_id,
                    status.as_str(),
                    rssi
                );
                device.status = status;
                device.signal_strength = rssi;
                device.last_seen = now;
                true
            }
            None => {
                log::debug!("Ignoring status for unregistered device {}", device_id);
                false
            }
        }
    }

    /// Refresh liveness of the sender (if registered) and forward the tap.
    ///
    /// The originating device is not checked: taps from unregistered
    /// readers are forwarded too.
    pub fn handle_tap(&self, msg: &TapMessage) {
        self.tap_at(msg, Utc::now());
    }

    pub fn tap_at(&self, msg: &TapMessage, now: DateTime<Utc>) {
        {
            let mut devices = self.write();
            if let Some(device) = devices.get_mut(&msg.device_id) {
                device.status = DeviceStatus::Online;
                device.last_seen = now;
            }
        }

        log::info!("Received UID from device {}: {}", msg.device_id, msg.uid);
        let handler = self
            .tap_handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(msg),
            None => log::warn!("No tap handler installed, dropping UID {}", msg.uid),
        }
    }

    /// Owned snapshot of every known device, ordered by device ID.
    pub fn list_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.read().values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Copy of one device record.
    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.read().get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Demote online devices silent for longer than the liveness timeout.
    ///
    /// Returns the IDs that went offline in this sweep.
    pub fn sweep_liveness(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::from_std(self.liveness_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let mut demoted = Vec::new();

        let mut devices = self.write();
        for device in devices.values_mut() {
            if device.status == DeviceStatus::Online && now - device.last_seen > timeout {
                device.status = DeviceStatus::Offline;
                log::info!("Device {} marked as offline", device.device_id);
                demoted.push(device.device_id.clone());
            }
        }
        demoted.sort();
        demoted
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Device>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Device>> {
        self.devices.write().unwrap_or_else(|e| e.into_inner())
    }
}
