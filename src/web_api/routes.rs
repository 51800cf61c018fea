//! HTTP API routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::access_log::AccessCommand;
use crate::door_registry::{ConnectionStatus, DeviceType};
use crate::error::{Error, Result};
use crate::models::{
    AccessAttemptRequest, AccessAttemptResponse, AccessLogsResponse, ClearResponse,
    DeviceConnectionResponse, DevicesStatusResponse,
};
use crate::state::AppState;

// ========================================
// Device Handlers
// ========================================

pub async fn devices_status(State(state): State<AppState>) -> impl IntoResponse {
    let devices = state.registry.list().await;
    let total_count = devices.len();

    Json(DevicesStatusResponse {
        devices,
        total_count,
        timestamp: Utc::now(),
    })
}

pub async fn device_connections(State(state): State<AppState>) -> impl IntoResponse {
    let mut connections: BTreeMap<String, ConnectionStatus> = BTreeMap::new();
    for door in state.registry.list().await {
        connections.insert(door.door_id, door.connection_status);
    }
    Json(connections)
}

pub async fn device_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let door = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("Device {id} not found")))?;

    let last_seen = match door.device_type {
        DeviceType::Physical => state.controllers.last_seen(&id).await,
        DeviceType::Virtual => None,
    };

    Ok(Json(DeviceConnectionResponse {
        device_id: door.door_id,
        connection_status: door.connection_status,
        last_seen,
    }))
}

// ========================================
// Access Log Handlers
// ========================================

#[derive(Deserialize)]
pub struct LogsQuery {
    limit: Option<usize>,
}

pub async fn access_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let ceiling = state.access_log.capacity().await;
    let limit = query.limit.unwrap_or(100).clamp(1, ceiling);

    let logs = state.access_log.latest(limit).await;
    let count = logs.len();

    Json(AccessLogsResponse {
        logs,
        count,
        timestamp: Utc::now(),
    })
}

pub async fn create_access_attempt(
    State(state): State<AppState>,
    Json(request): Json<AccessAttemptRequest>,
) -> Result<impl IntoResponse> {
    // Unknown commands are validation failures, not access denials
    let command = AccessCommand::parse(&request.command)
        .ok_or_else(|| Error::Validation("invalid_request".to_string()))?;

    let decision = state
        .access_control
        .process_attempt(&request.device_id, &request.user_card_id, command)
        .await;

    Ok(Json(AccessAttemptResponse {
        status: decision.status,
        message: decision.message,
        device_state: decision.door,
        timestamp: Utc::now(),
    }))
}

// ========================================
// Rate Limiter Handlers
// ========================================

pub async fn rate_limiter_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.rate_limiter.stats().await)
}

#[derive(Deserialize)]
pub struct UserStatusQuery {
    device_id: String,
    user_id: String,
}

pub async fn rate_limiter_user_status(
    State(state): State<AppState>,
    Query(query): Query<UserStatusQuery>,
) -> impl IntoResponse {
    Json(
        state
            .rate_limiter
            .user_status(&query.device_id, &query.user_id)
            .await,
    )
}

#[derive(Deserialize)]
pub struct ClearQuery {
    user_id: Option<String>,
}

pub async fn rate_limiter_clear(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Result<impl IntoResponse> {
    let is_admin = query
        .user_id
        .map(|user| user.eq_ignore_ascii_case(&state.config.admin_user_id))
        .unwrap_or(false);

    if !is_admin {
        return Err(Error::Forbidden(
            "rate limiter clear requires the admin user".to_string(),
        ));
    }

    let cleared_attempts = state.rate_limiter.clear_all().await;
    Ok(Json(ClearResponse { cleared_attempts }))
}
