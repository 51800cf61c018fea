//! Door entity and status types

use serde::{Deserialize, Serialize};

/// Physical position of the door leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhysicalStatus {
    Open,
    Closed,
}

/// Server-authoritative lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Locked,
    Unlocked,
}

/// Whether the door is actuated by an external controller or by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Actuated by a controller session; `physical_status` is controller-confirmed
    Physical,
    /// Server-owned; state changes apply immediately
    Virtual,
}

/// Controller connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Offline,
    Unknown,
}

/// Door entity (SSoT)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Door {
    pub door_id: String,
    pub location: String,
    pub physical_status: PhysicalStatus,
    pub lock_state: LockState,
    pub device_type: DeviceType,
    pub connection_status: ConnectionStatus,
}

/// Seed record for a door, loaded from configuration at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorSeed {
    pub door_id: String,
    pub location: String,
    pub device_type: DeviceType,
    pub physical_status: PhysicalStatus,
    pub lock_state: LockState,
}

impl Door {
    /// Build a door from its seed record.
    ///
    /// Virtual doors are online for their whole lifetime; physical doors
    /// start offline until a controller session attaches.
    pub fn from_seed(seed: &DoorSeed) -> Self {
        let connection_status = match seed.device_type {
            DeviceType::Virtual => ConnectionStatus::Online,
            DeviceType::Physical => ConnectionStatus::Offline,
        };

        Self {
            door_id: seed.door_id.clone(),
            location: seed.location.clone(),
            physical_status: seed.physical_status,
            lock_state: seed.lock_state,
            device_type: seed.device_type,
            connection_status,
        }
    }
}
