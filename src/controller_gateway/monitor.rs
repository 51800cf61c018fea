//! Heartbeat monitor
//!
//! One tick per `ping_interval`: probe every session, then reap
//! controllers whose last inbound frame is past the pong deadline.
//! A reaped door goes offline, the change is broadcast, and a denied
//! heartbeat event is written to the audit trail.

use crate::access_log::{AccessEvent, AccessLogService, AccessStatus};
use crate::door_registry::{ConnectionStatus, DoorRegistry};
use crate::realtime_hub::{DeviceStateChangeMessage, HubMessage, RealtimeHub};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::ControllerGateway;

/// System actor recorded on heartbeat audit events
pub const SYSTEM_USER_ID: &str = "system";

/// HeartbeatMonitor instance
pub struct HeartbeatMonitor {
    gateway: Arc<ControllerGateway>,
    registry: Arc<DoorRegistry>,
    access_log: Arc<AccessLogService>,
    hub: Arc<RealtimeHub>,
    pong_deadline: Duration,
}

impl HeartbeatMonitor {
    /// Create new HeartbeatMonitor
    pub fn new(
        gateway: Arc<ControllerGateway>,
        registry: Arc<DoorRegistry>,
        access_log: Arc<AccessLogService>,
        hub: Arc<RealtimeHub>,
        pong_deadline: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            access_log,
            hub,
            pong_deadline,
        }
    }

    /// Run one heartbeat round
    pub async fn tick(&self) {
        // Observers that cannot take a ping are dropped inside broadcast
        self.hub.broadcast(HubMessage::Ping).await;
        self.gateway.ping_all().await;

        for door_id in self.gateway.reap_stale(self.pong_deadline).await {
            if let Some(door) = self
                .registry
                .set_connection_status(&door_id, ConnectionStatus::Offline)
                .await
            {
                self.hub
                    .broadcast(HubMessage::DeviceStateChange(DeviceStateChangeMessage {
                        device_id: door_id.clone(),
                        new_state: door,
                        timestamp: Utc::now(),
                    }))
                    .await;
            }

            let mut event = AccessEvent {
                sequence: 0,
                timestamp: Utc::now(),
                device_id: door_id.clone(),
                user_id: SYSTEM_USER_ID.to_string(),
                command: "heartbeat".to_string(),
                status: AccessStatus::Denied,
                message: "controller timeout".to_string(),
            };
            event.sequence = self.access_log.append(event.clone()).await;
            self.hub.broadcast(HubMessage::AccessEvent(event)).await;
        }
    }
}
