//! WebSocket endpoints
//!
//! Dashboard observers attach at the configured WS path; device
//! controllers attach one level below it, keyed by door id. Each session
//! runs two tasks: an outbound pump draining a per-session channel into
//! the socket, and the inbound loop which also watches the session's
//! shutdown signal.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::access_control::BUTTON_USER_ID;
use crate::access_log::{AccessCommand, AccessStatus};
use crate::controller_gateway::{ControllerMessage, DeviceMessage};
use crate::door_registry::{ConnectionStatus, DeviceType};
use crate::error::Error;
use crate::realtime_hub::{
    ClientMessage, CommandResponseMessage, DeviceStateChangeMessage, ErrorMessage, HubMessage,
    InitialDataMessage,
};
use crate::state::AppState;

// ========================================
// Dashboard WebSocket
// ========================================

pub async fn dashboard_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_dashboard_socket(socket, state))
}

async fn handle_dashboard_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (observer_id, mut rx) = state.hub.register().await;

    // Snapshot first, so the observer can render before any delta arrives
    let devices = state.registry.list().await;
    state
        .hub
        .send_to(
            &observer_id,
            HubMessage::InitialData(InitialDataMessage {
                devices,
                timestamp: Utc::now(),
            }),
        )
        .await;

    let pump = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_dashboard_message(&state, &observer_id, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unregister(&observer_id).await;
    let _ = pump.await;
}

async fn handle_dashboard_message(state: &AppState, observer_id: &Uuid, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(connection_id = %observer_id, error = %e, "Malformed dashboard message");
            state
                .hub
                .send_to(
                    observer_id,
                    HubMessage::Error(ErrorMessage {
                        message: "invalid message format".to_string(),
                    }),
                )
                .await;
            return;
        }
    };

    match message {
        ClientMessage::Command {
            device_id,
            command,
            user_id,
        } => {
            let Some(parsed) = AccessCommand::parse(&command) else {
                state
                    .hub
                    .send_to(
                        observer_id,
                        HubMessage::CommandResponse(CommandResponseMessage {
                            device_id,
                            command,
                            status: AccessStatus::Denied,
                            message: "invalid_request".to_string(),
                        }),
                    )
                    .await;
                return;
            };

            // Dashboard commands without an explicit user run as admin
            let user_id = user_id.unwrap_or_else(|| state.config.admin_user_id.clone());

            let decision = state
                .access_control
                .process_attempt(&device_id, &user_id, parsed)
                .await;

            state
                .hub
                .send_to(
                    observer_id,
                    HubMessage::CommandResponse(CommandResponseMessage {
                        device_id,
                        command,
                        status: decision.status,
                        message: decision.message,
                    }),
                )
                .await;
        }
        ClientMessage::Ping => {
            state.hub.send_to(observer_id, HubMessage::Pong).await;
        }
        // Liveness is implicit; unreachable observers are dropped on send
        ClientMessage::Pong => {}
    }
}

// ========================================
// Controller WebSocket
// ========================================

pub async fn controller_ws(
    State(state): State<AppState>,
    Path(door_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(door) = state.registry.get(&door_id).await else {
        return Error::NotFound(format!("Device {door_id} not found")).into_response();
    };

    if door.device_type == DeviceType::Virtual {
        return Error::Validation("virtual devices do not attach controllers".to_string())
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_controller_socket(socket, state, door_id))
}

async fn handle_controller_socket(socket: WebSocket, state: AppState, door_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = state.controllers.register(&door_id, tx).await;
    let session_id = handle.session_id;
    let last_seen = handle.last_seen_ms;
    let mut shutdown_rx = handle.shutdown_rx;

    if let Some(door) = state
        .registry
        .set_connection_status(&door_id, ConnectionStatus::Online)
        .await
    {
        state
            .hub
            .broadcast(HubMessage::DeviceStateChange(DeviceStateChangeMessage {
                device_id: door_id.clone(),
                new_state: door,
                timestamp: Utc::now(),
            }))
            .await;
    }

    // Ask the device to announce its current status
    let _ = state
        .controllers
        .send(&door_id, ControllerMessage::Handshake)
        .await;

    // Outbound pump; also delivers the close frame when the session is
    // displaced or times out
    let mut pump_shutdown = shutdown_rx.clone();
    let pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let Ok(json) = serde_json::to_string(&frame) else { continue };
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                _ = pump_shutdown.changed() => {
                    let reason = pump_shutdown.borrow().unwrap_or("closed");
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                // Any inbound frame proves the controller is alive
                last_seen.store(state.controllers.now_ms(), Ordering::Relaxed);
                match msg {
                    Message::Text(text) => {
                        handle_device_message(&state, &door_id, &text).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::info!(
                    door_id = %door_id,
                    reason = ?*shutdown_rx.borrow(),
                    "Controller session closing"
                );
                break;
            }
        }
    }

    // A displaced session no longer owns the slot and must not flip the
    // door offline under its successor
    if state.controllers.unregister(&door_id, &session_id).await {
        if let Some(door) = state
            .registry
            .set_connection_status(&door_id, ConnectionStatus::Offline)
            .await
        {
            state
                .hub
                .broadcast(HubMessage::DeviceStateChange(DeviceStateChangeMessage {
                    device_id: door_id.clone(),
                    new_state: door,
                    timestamp: Utc::now(),
                }))
                .await;
        }
    }

    let _ = pump.await;
}

async fn handle_device_message(state: &AppState, door_id: &str, text: &str) {
    let message: DeviceMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(door_id = %door_id, error = %e, "Unparseable controller message");
            return;
        }
    };

    match message {
        DeviceMessage::StatusUpdate { data, .. } => {
            if let Some(door) = state
                .registry
                .set_physical_status(door_id, data.physical_status)
                .await
            {
                tracing::info!(
                    door_id = %door_id,
                    physical_status = ?data.physical_status,
                    "Controller confirmed physical status"
                );
                state
                    .hub
                    .broadcast(HubMessage::DeviceStateChange(DeviceStateChangeMessage {
                        device_id: door_id.to_string(),
                        new_state: door,
                        timestamp: Utc::now(),
                    }))
                    .await;
            }

            let _ = state
                .controllers
                .send(
                    door_id,
                    ControllerMessage::Ack {
                        message: "status received".to_string(),
                    },
                )
                .await;
        }
        DeviceMessage::ButtonCommandRequest { command, .. } => {
            let Some(parsed) = AccessCommand::parse(&command) else {
                let _ = state
                    .controllers
                    .send(
                        door_id,
                        ControllerMessage::CommandDenied {
                            command,
                            reason: "invalid_request".to_string(),
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
                return;
            };

            // The engine dispatches the actuation or the denial notice
            state
                .access_control
                .process_attempt(door_id, BUTTON_USER_ID, parsed)
                .await;
        }
        DeviceMessage::CommandResponse {
            command,
            success,
            message,
            ..
        } => {
            tracing::info!(
                door_id = %door_id,
                command = %command,
                success,
                message = ?message,
                "Controller command response"
            );
        }
        DeviceMessage::Pong { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door_registry::PhysicalStatus;
    use crate::state::AppConfig;
    use serde_json::Value;

    fn test_state() -> AppState {
        AppState::initialize(AppConfig::default())
    }

    #[tokio::test]
    async fn test_status_update_confirms_physical_status() {
        let state = test_state();
        let (_id, mut observer_rx) = state.hub.register().await;

        handle_device_message(
            &state,
            "DOOR-001",
            r#"{"type":"status_update","data":{"physical_status":"open"},"timestamp":"99"}"#,
        )
        .await;

        assert_eq!(
            state.registry.get("DOOR-001").await.unwrap().physical_status,
            PhysicalStatus::Open
        );

        let frame: Value = serde_json::from_str(&observer_rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "device_state_change");
        assert_eq!(frame["data"]["new_state"]["physical_status"], "open");
    }

    #[tokio::test]
    async fn test_status_update_is_acked() {
        let state = test_state();
        let (tx, mut controller_rx) = mpsc::unbounded_channel();
        state.controllers.register("DOOR-001", tx).await;

        handle_device_message(
            &state,
            "DOOR-001",
            r#"{"type":"status_update","data":{"physical_status":"closed"}}"#,
        )
        .await;

        assert!(matches!(
            controller_rx.recv().await.unwrap(),
            ControllerMessage::Ack { .. }
        ));
    }

    #[tokio::test]
    async fn test_button_request_on_locked_door_is_refused() {
        let state = test_state();
        let (tx, mut controller_rx) = mpsc::unbounded_channel();
        state.controllers.register("DOOR-001", tx).await;

        handle_device_message(
            &state,
            "DOOR-001",
            r#"{"type":"button_command_request","command":"open","timestamp":"12"}"#,
        )
        .await;

        match controller_rx.recv().await.unwrap() {
            ControllerMessage::CommandDenied { command, reason, .. } => {
                assert_eq!(command, "open");
                assert_eq!(reason, "door_locked");
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let events = state.access_log.latest(1).await;
        assert_eq!(events[0].user_id, BUTTON_USER_ID);
        assert_eq!(events[0].status, AccessStatus::Denied);
    }

    #[tokio::test]
    async fn test_button_request_with_garbage_command() {
        let state = test_state();
        let (tx, mut controller_rx) = mpsc::unbounded_channel();
        state.controllers.register("DOOR-001", tx).await;

        handle_device_message(
            &state,
            "DOOR-001",
            r#"{"type":"button_command_request","command":"levitate"}"#,
        )
        .await;

        match controller_rx.recv().await.unwrap() {
            ControllerMessage::CommandDenied { reason, .. } => {
                assert_eq!(reason, "invalid_request");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        // Validation failures never reach the audit log
        assert_eq!(state.access_log.len().await, 0);
    }

    #[tokio::test]
    async fn test_dashboard_command_replies_to_originator() {
        let state = test_state();
        let (observer_id, mut rx) = state.hub.register().await;
        let (_other, mut other_rx) = state.hub.register().await;

        handle_dashboard_message(
            &state,
            &observer_id,
            r#"{"type":"command","device_id":"DOOR-002","command":"open","user_id":"alice"}"#,
        )
        .await;

        // Both observers see the state change and access event
        for rx in [&mut rx, &mut other_rx] {
            let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["type"], "device_state_change");
        }

        // Only the originator gets the command response
        let mut saw_response = false;
        while let Ok(json) = rx.try_recv() {
            let frame: Value = serde_json::from_str(&json).unwrap();
            if frame["type"] == "command_response" {
                assert_eq!(frame["data"]["status"], "granted");
                saw_response = true;
            }
        }
        assert!(saw_response);

        while let Ok(json) = other_rx.try_recv() {
            let frame: Value = serde_json::from_str(&json).unwrap();
            assert_ne!(frame["type"], "command_response");
        }
    }

    #[tokio::test]
    async fn test_dashboard_invalid_command_not_logged() {
        let state = test_state();
        let (observer_id, mut rx) = state.hub.register().await;

        handle_dashboard_message(
            &state,
            &observer_id,
            r#"{"type":"command","device_id":"DOOR-002","command":"warp"}"#,
        )
        .await;

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "command_response");
        assert_eq!(frame["data"]["message"], "invalid_request");
        assert_eq!(state.access_log.len().await, 0);
    }

    #[tokio::test]
    async fn test_dashboard_ping_gets_pong() {
        let state = test_state();
        let (observer_id, mut rx) = state.hub.register().await;

        handle_dashboard_message(&state, &observer_id, r#"{"type":"ping"}"#).await;

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "pong");
    }

    #[tokio::test]
    async fn test_dashboard_garbage_gets_error_frame() {
        let state = test_state();
        let (observer_id, mut rx) = state.hub.register().await;

        handle_dashboard_message(&state, &observer_id, "not json").await;

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "error");
    }
}
