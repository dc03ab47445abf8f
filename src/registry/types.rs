//! Reader device records and the inbound message payloads.
//!
//! Field names follow the JSON the reader firmware publishes
//! (`device_id`, `type`, `firmware`, `ip`, `rssi`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of a reader as seen by the hub.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    /// Wire spelling, as used in the `status` payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

/// Identity and liveness record for one reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    /// Unique reader ID, chosen by the firmware.
    pub device_id: String,
    /// Hardware model, e.g. `fiz-reader`.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Firmware version string as reported at registration.
    #[serde(rename = "firmware")]
    pub firmware_version: String,
    /// Address the reader registered from.
    #[serde(rename = "ip")]
    pub ip_address: String,
    pub status: DeviceStatus,
    /// Last reported RSSI in dBm; 0 until the first status report.
    #[serde(rename = "rssi")]
    pub signal_strength: i32,
    /// Time of the last message that proved the reader alive.
    pub last_seen: DateTime<Utc>,
}

/// Payload of `fiz/register`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterMessage {
    pub device_id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub firmware: String,
    pub ip: String,
}

/// Payload of `fiz/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusMessage {
    pub device_id: String,
    pub status: DeviceStatus,
    pub rssi: i32,
}

/// Payload of `fiz/uid`: one tag read by a reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TapMessage {
    pub device_id: String,
    pub uid: String,
    /// Reader-side timestamp (Unix seconds). Informational only.
    #[serde(default)]
    pub timestamp: i64,
}
