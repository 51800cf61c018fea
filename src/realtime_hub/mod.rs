//! RealtimeHub - Dashboard WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - Observer connection management
//! - Fan-out of state changes and access events
//! - Originator-only command replies
//!
//! Observers carry no identity. A failed channel send means the session
//! task is gone, so the observer is dropped on the spot.

use crate::access_log::{AccessEvent, AccessStatus};
use crate::door_registry::Door;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Server-to-dashboard message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// Snapshot pushed right after an observer connects
    InitialData(InitialDataMessage),
    DeviceStateChange(DeviceStateChangeMessage),
    AccessEvent(AccessEvent),
    /// Reply to the observer that issued a command
    CommandResponse(CommandResponseMessage),
    Ping,
    Pong,
    Error(ErrorMessage),
}

/// Initial snapshot payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialDataMessage {
    pub devices: Vec<Door>,
    pub timestamp: DateTime<Utc>,
}

/// Device state change payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateChangeMessage {
    pub device_id: String,
    pub new_state: Door,
    pub timestamp: DateTime<Utc>,
}

/// Command outcome payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponseMessage {
    pub device_id: String,
    pub command: String,
    pub status: AccessStatus,
    pub message: String,
}

/// Error payload for malformed client traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Dashboard-to-server messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Command {
        device_id: String,
        command: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    Ping,
    Pong,
}

/// Observer connection
struct ObserverConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ObserverConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new observer
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ObserverConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Observer connected");

        (id, rx)
    }

    /// Unregister an observer
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Observer disconnected");
        }
    }

    /// Broadcast a message to every observer.
    ///
    /// Delivery is best-effort and at-most-once; an observer whose channel
    /// has closed is removed.
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub message");
                return;
            }
        };

        let dead: Vec<Uuid> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|conn| conn.tx.send(json.clone()).is_err())
                .map(|conn| conn.id)
                .collect()
        };

        for id in dead {
            tracing::warn!(connection_id = %id, "Dropping unreachable observer");
            self.unregister(&id).await;
        }
    }

    /// Send a message to one observer
    pub async fn send_to(&self, id: &Uuid, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub message");
                return;
            }
        };

        let delivered = {
            let connections = self.connections.read().await;
            connections
                .get(id)
                .map(|conn| conn.tx.send(json).is_ok())
                .unwrap_or(false)
        };

        if !delivered {
            self.unregister(id).await;
        }
    }

    /// Get observer count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}
