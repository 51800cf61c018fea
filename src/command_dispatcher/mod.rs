//! CommandDispatcher - Controller Actuation Adapter
//!
//! Thin adapter over the controller gateway. Dispatch is fire-and-forget:
//! the frame is queued to the session and the controller's later
//! `status_update` is what moves `physical_status`.

use crate::access_log::AccessCommand;
use crate::controller_gateway::{ControllerGateway, ControllerMessage, NotConnected};
use chrono::Utc;
use std::sync::Arc;

/// CommandDispatcher instance
pub struct CommandDispatcher {
    gateway: Arc<ControllerGateway>,
}

impl CommandDispatcher {
    /// Create new CommandDispatcher
    pub fn new(gateway: Arc<ControllerGateway>) -> Self {
        Self { gateway }
    }

    /// Send an authorized actuation to the door's controller.
    ///
    /// `NotConnected` means the grant must be revised to a
    /// device-offline denial before anyone observes it.
    pub async fn dispatch(
        &self,
        door_id: &str,
        command: AccessCommand,
    ) -> Result<(), NotConnected> {
        self.gateway
            .send(
                door_id,
                ControllerMessage::Command {
                    command: command.as_str().to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await?;

        tracing::info!(door_id = %door_id, command = %command, "Command dispatched to controller");
        Ok(())
    }

    /// Best-effort refusal notice for a denied button request
    pub async fn notify_denied(&self, door_id: &str, command: AccessCommand, reason: &str) {
        let result = self
            .gateway
            .send(
                door_id,
                ControllerMessage::CommandDenied {
                    command: command.as_str().to_string(),
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await;

        if result.is_err() {
            tracing::debug!(door_id = %door_id, command = %command, "Denial notice not deliverable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_dispatch_builds_command_frame() {
        let gateway = Arc::new(ControllerGateway::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.register("DOOR-001", tx).await;

        let dispatcher = CommandDispatcher::new(gateway);
        dispatcher
            .dispatch("DOOR-001", AccessCommand::Open)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            ControllerMessage::Command { command, .. } => assert_eq!(command, "open"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_offline_is_not_connected() {
        let dispatcher = CommandDispatcher::new(Arc::new(ControllerGateway::new()));
        assert_eq!(
            dispatcher.dispatch("DOOR-001", AccessCommand::Open).await,
            Err(NotConnected)
        );
    }

    #[tokio::test]
    async fn test_notify_denied_swallows_offline() {
        let dispatcher = CommandDispatcher::new(Arc::new(ControllerGateway::new()));
        // Must not panic or error
        dispatcher
            .notify_denied("DOOR-001", AccessCommand::Open, "door_locked")
            .await;
    }
}
