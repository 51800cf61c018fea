//! WebAPI - Ingress Surface
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Dashboard and controller WebSocket endpoints
//! - Request validation and response formatting

mod routes;
mod ws_routes;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::models::{HealthMetrics, HealthResponse};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/devices/status", get(routes::devices_status))
        .route("/devices/connections", get(routes::device_connections))
        .route("/devices/:id/connection", get(routes::device_connection))
        .route("/access_logs", get(routes::access_logs))
        .route("/access_log", post(routes::create_access_attempt))
        .route("/security/rate_limiter/stats", get(routes::rate_limiter_stats))
        .route(
            "/security/rate_limiter/user_status",
            get(routes::rate_limiter_user_status),
        )
        .route(
            "/security/rate_limiter/clear",
            delete(routes::rate_limiter_clear),
        )
        .route("/health", get(health_check));

    let ws_path = state.config.ws_endpoint.clone();

    Router::new()
        .route("/", get(service_info))
        .nest(&state.config.api_prefix, api)
        .route(&ws_path, get(ws_routes::dashboard_ws))
        .route(&format!("{ws_path}/:door_id"), get(ws_routes::controller_ws))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.system_health.read().await.clone();

    let response = HealthResponse {
        status: "healthy".to_string(),
        metrics: HealthMetrics {
            uptime_sec: state.started_at.elapsed().as_secs(),
            doors_total: state.registry.len().await,
            controllers_connected: state.controllers.connection_count().await,
            observers_connected: state.hub.connection_count(),
            access_log_entries: state.access_log.len().await,
            rate_limit_records: state.rate_limiter.stats().await.total_records,
            cpu_percent: health.cpu_percent,
            memory_percent: health.memory_percent,
        },
    };

    Json(response)
}

/// Root service info
pub async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": "Doorhub Access Control API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "api": state.config.api_prefix,
            "websocket": state.config.ws_endpoint,
            "health": format!("{}/health", state.config.api_prefix),
        }
    }))
}
