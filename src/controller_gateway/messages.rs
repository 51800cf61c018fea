//! Controller WebSocket wire messages
//!
//! Inbound timestamps come from device firmware clocks (often just a
//! millis counter) and are carried opaquely, never interpreted.

use crate::door_registry::PhysicalStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-to-controller messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    /// Authorized actuation
    Command {
        command: String,
        timestamp: DateTime<Utc>,
    },
    /// Refusal of a button request, so the device suppresses local actuation
    CommandDenied {
        command: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Heartbeat probe
    Ping { timestamp: DateTime<Utc> },
    /// Ask the device to re-announce its status
    Handshake,
    /// Receipt acknowledgement
    Ack { message: String },
}

/// Controller-to-server messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Authoritative physical status report
    StatusUpdate {
        data: StatusUpdateData,
        #[serde(default)]
        timestamp: Option<Value>,
    },
    /// Physical button press, routed through authorization
    ButtonCommandRequest {
        command: String,
        #[serde(default)]
        timestamp: Option<Value>,
    },
    /// Informational actuation result
    CommandResponse {
        command: String,
        success: bool,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timestamp: Option<Value>,
    },
    /// Heartbeat reply
    Pong {
        #[serde(default)]
        timestamp: Option<Value>,
    },
}

/// Status update payload
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateData {
    pub physical_status: PhysicalStatus,
}
