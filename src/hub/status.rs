//! Read-only status projection served to operators.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::indicator::IndicatorState;
use crate::power::PowerState;
use crate::registry::Device;
use crate::session::Phase;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HubStatus {
    /// Host name of the machine running the hub.
    pub hub_name: String,
    /// Current bonding session phase.
    pub phase: Phase,
    pub power_state: PowerState,
    /// What the indicator is showing right now.
    pub indicator: IndicatorState,
    /// UIDs collected for the current bond, in tap order.
    pub uids: Vec<String>,
    /// Set once the bond validates; omitted while empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bond_id: String,
    /// Time of the last tap or wake-up.
    pub last_activity: DateTime<Utc>,
    /// Every known reader, ordered by device ID.
    pub devices: Vec<Device>,
}

/// Host name used to identify this hub, with a fixed fallback.
pub fn hub_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "fizhub".to_string())
}
