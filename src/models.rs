//! Shared wire models
//!
//! Response and request bodies used by the HTTP surface.

use crate::access_log::{AccessEvent, AccessStatus};
use crate::door_registry::{ConnectionStatus, Door};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GET /api/devices/status
#[derive(Debug, Clone, Serialize)]
pub struct DevicesStatusResponse {
    pub devices: Vec<Door>,
    pub total_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/devices/:id/connection
#[derive(Debug, Clone, Serialize)]
pub struct DeviceConnectionResponse {
    pub device_id: String,
    pub connection_status: ConnectionStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// GET /api/access_logs
#[derive(Debug, Clone, Serialize)]
pub struct AccessLogsResponse {
    pub logs: Vec<AccessEvent>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/access_log request body.
///
/// `user_card_id` is the historical field name used by card reader
/// simulators; it carries the user id.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessAttemptRequest {
    pub device_id: String,
    pub user_card_id: String,
    pub command: String,
}

/// POST /api/access_log response body
#[derive(Debug, Clone, Serialize)]
pub struct AccessAttemptResponse {
    pub status: AccessStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_state: Option<Door>,
    pub timestamp: DateTime<Utc>,
}

/// DELETE /api/security/rate_limiter/clear
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub cleared_attempts: usize,
}

/// GET /api/health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub metrics: HealthMetrics,
}

/// Health check metrics
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub uptime_sec: u64,
    pub doors_total: usize,
    pub controllers_connected: usize,
    pub observers_connected: u64,
    pub access_log_entries: usize,
    pub rate_limit_records: usize,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}
