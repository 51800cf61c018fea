//! ControllerGateway - Device Session Registry
//!
//! ## Responsibilities
//!
//! - Track the single controller session per physical door
//! - Displace a stale session when a new controller attaches
//! - Serialize outbound frames to each controller
//! - Heartbeat bookkeeping (last-seen timestamps, stale reaping)
//!
//! Timestamps are milliseconds since the gateway's own epoch so that
//! heartbeat math never moves backwards with the wallclock.

mod messages;
pub mod monitor;

pub use messages::*;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

/// Close reason propagated to a session task through its shutdown channel
pub type CloseReason = Option<&'static str>;

/// Returned by `send` when no controller session exists for the door
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotConnected;

/// Handle returned to the WebSocket task that owns the session I/O
pub struct RegisteredController {
    pub session_id: Uuid,
    /// Shared with the gateway; the session task stores on every inbound frame
    pub last_seen_ms: Arc<AtomicU64>,
    pub shutdown_rx: watch::Receiver<CloseReason>,
}

struct ControllerSession {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<ControllerMessage>,
    last_seen_ms: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<CloseReason>,
}

/// ControllerGateway instance
pub struct ControllerGateway {
    epoch: Instant,
    controllers: RwLock<HashMap<String, ControllerSession>>,
}

impl ControllerGateway {
    /// Create new ControllerGateway
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            controllers: RwLock::new(HashMap::new()),
        }
    }

    /// Milliseconds since the gateway epoch
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Register a controller session for `door_id`.
    ///
    /// Any existing session for the same door is signalled to close with
    /// reason "replaced" before the new one takes the slot.
    pub async fn register(
        &self,
        door_id: &str,
        tx: mpsc::UnboundedSender<ControllerMessage>,
    ) -> RegisteredController {
        let session_id = Uuid::new_v4();
        let last_seen_ms = Arc::new(AtomicU64::new(self.now_ms()));
        let (shutdown_tx, shutdown_rx) = watch::channel::<CloseReason>(None);

        let session = ControllerSession {
            session_id,
            tx,
            last_seen_ms: last_seen_ms.clone(),
            shutdown_tx,
        };

        {
            let mut controllers = self.controllers.write().await;
            if let Some(old) = controllers.insert(door_id.to_string(), session) {
                tracing::warn!(
                    door_id = %door_id,
                    old_session = %old.session_id,
                    "Controller re-attached, displacing previous session"
                );
                let _ = old.shutdown_tx.send(Some("replaced"));
            }
        }

        tracing::info!(door_id = %door_id, session_id = %session_id, "Controller connected");

        RegisteredController {
            session_id,
            last_seen_ms,
            shutdown_rx,
        }
    }

    /// Remove the session for `door_id` if it is still owned by `session_id`.
    ///
    /// The ownership check keeps a displaced task from tearing down its
    /// successor. Returns whether anything was removed.
    pub async fn unregister(&self, door_id: &str, session_id: &Uuid) -> bool {
        let mut controllers = self.controllers.write().await;
        match controllers.get(door_id) {
            Some(session) if session.session_id == *session_id => {
                controllers.remove(door_id);
                tracing::info!(door_id = %door_id, session_id = %session_id, "Controller disconnected");
                true
            }
            _ => false,
        }
    }

    /// Send a frame to the door's controller
    pub async fn send(
        &self,
        door_id: &str,
        message: ControllerMessage,
    ) -> Result<(), NotConnected> {
        let controllers = self.controllers.read().await;
        let session = controllers.get(door_id).ok_or(NotConnected)?;
        session.tx.send(message).map_err(|_| NotConnected)
    }

    /// Whether a controller session exists for the door
    pub async fn is_connected(&self, door_id: &str) -> bool {
        let controllers = self.controllers.read().await;
        controllers.contains_key(door_id)
    }

    /// Wallclock time of the controller's last inbound frame
    pub async fn last_seen(&self, door_id: &str) -> Option<DateTime<Utc>> {
        let controllers = self.controllers.read().await;
        let session = controllers.get(door_id)?;
        let idle_ms = self
            .now_ms()
            .saturating_sub(session.last_seen_ms.load(Ordering::Relaxed));
        Some(Utc::now() - ChronoDuration::milliseconds(idle_ms as i64))
    }

    /// Number of attached controllers
    pub async fn connection_count(&self) -> usize {
        let controllers = self.controllers.read().await;
        controllers.len()
    }

    /// Send a heartbeat probe to every controller.
    ///
    /// Send failures are ignored here; a dead session is reaped by the
    /// deadline check.
    pub async fn ping_all(&self) {
        let controllers = self.controllers.read().await;
        for (door_id, session) in controllers.iter() {
            if session
                .tx
                .send(ControllerMessage::Ping {
                    timestamp: Utc::now(),
                })
                .is_err()
            {
                tracing::debug!(door_id = %door_id, "Heartbeat probe not deliverable");
            }
        }
    }

    /// Remove every session whose last inbound frame is older than
    /// `deadline`, signalling each to close. Returns the affected door ids.
    pub async fn reap_stale(&self, deadline: Duration) -> Vec<String> {
        let now = self.now_ms();
        let deadline_ms = deadline.as_millis() as u64;

        let mut controllers = self.controllers.write().await;
        let stale: Vec<String> = controllers
            .iter()
            .filter(|(_, session)| {
                now.saturating_sub(session.last_seen_ms.load(Ordering::Relaxed)) > deadline_ms
            })
            .map(|(door_id, _)| door_id.clone())
            .collect();

        for door_id in &stale {
            if let Some(session) = controllers.remove(door_id) {
                tracing::warn!(
                    door_id = %door_id,
                    session_id = %session.session_id,
                    "Controller heartbeat deadline exceeded, closing session"
                );
                let _ = session.shutdown_tx.send(Some("timeout"));
            }
        }

        stale
    }
}

impl Default for ControllerGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_controller_is_not_connected() {
        let gateway = ControllerGateway::new();
        let result = gateway.send("DOOR-001", ControllerMessage::Handshake).await;
        assert_eq!(result, Err(NotConnected));
    }

    #[tokio::test]
    async fn test_register_and_send() {
        let gateway = ControllerGateway::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.register("DOOR-001", tx).await;

        gateway
            .send("DOOR-001", ControllerMessage::Handshake)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            ControllerMessage::Handshake
        ));
    }

    #[tokio::test]
    async fn test_new_session_displaces_old() {
        let gateway = ControllerGateway::new();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let old = gateway.register("DOOR-001", old_tx).await;
        let mut old_shutdown = old.shutdown_rx;

        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        let new = gateway.register("DOOR-001", new_tx).await;

        old_shutdown.changed().await.unwrap();
        assert_eq!(*old_shutdown.borrow(), Some("replaced"));

        // Frames go to the new session
        gateway
            .send("DOOR-001", ControllerMessage::Handshake)
            .await
            .unwrap();
        assert!(new_rx.recv().await.is_some());

        // The displaced task cannot remove its successor
        assert!(!gateway.unregister("DOOR-001", &old.session_id).await);
        assert!(gateway.unregister("DOOR-001", &new.session_id).await);
    }

    #[tokio::test]
    async fn test_reap_stale_signals_timeout() {
        let gateway = ControllerGateway::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = gateway.register("DOOR-001", tx).await;
        let mut shutdown = handle.shutdown_rx;

        // Pretend the controller has been silent since the epoch
        handle.last_seen_ms.store(0, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let reaped = gateway.reap_stale(Duration::from_millis(1)).await;
        assert_eq!(reaped, vec!["DOOR-001".to_string()]);
        assert!(!gateway.is_connected("DOOR-001").await);

        shutdown.changed().await.unwrap();
        assert_eq!(*shutdown.borrow(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_fresh_session_survives_reap() {
        let gateway = ControllerGateway::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        gateway.register("DOOR-001", tx).await;

        let reaped = gateway.reap_stale(Duration::from_secs(30)).await;
        assert!(reaped.is_empty());
        assert!(gateway.is_connected("DOOR-001").await);
    }
}
