//! Application state
//!
//! Holds all shared components and configuration

use crate::access_control::{AccessControlService, AccessPolicy};
use crate::access_log::AccessLogService;
use crate::command_dispatcher::CommandDispatcher;
use crate::controller_gateway::ControllerGateway;
use crate::door_registry::{DeviceType, DoorRegistry, DoorSeed, LockState, PhysicalStatus};
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::realtime_hub::RealtimeHub;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Comma-separated CORS origins, `*` for any
    pub allowed_origins: String,
    /// Prefix for HTTP endpoints
    pub api_prefix: String,
    /// Dashboard WebSocket path; controllers attach under it
    pub ws_endpoint: String,
    /// User id granted the administrative role
    pub admin_user_id: String,
    /// Rate limiter tuning
    pub rate_limit: RateLimitConfig,
    /// Whether the admin user bypasses the rate limiter
    pub rate_limit_exempt_admin: bool,
    /// Heartbeat probe cadence
    pub ping_interval: Duration,
    /// Silence threshold after which a controller session is dead
    pub pong_deadline: Duration,
    /// Access log retention ceiling
    pub access_log_capacity: usize,
    /// Door fleet seeded at startup
    pub door_seeds: Vec<DoorSeed>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
            api_prefix: std::env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            ws_endpoint: std::env::var("WS_ENDPOINT").unwrap_or_else(|_| "/ws".to_string()),
            admin_user_id: std::env::var("ADMIN_USER_ID").unwrap_or_else(|_| "admin".to_string()),
            rate_limit: RateLimitConfig {
                max_attempts_per_minute: env_usize("RATE_LIMIT_MAX_ATTEMPTS_PER_MINUTE", 10),
                max_failed_attempts: env_usize("RATE_LIMIT_MAX_FAILED_ATTEMPTS", 5),
                lockout_duration: Duration::from_secs(env_u64(
                    "RATE_LIMIT_LOCKOUT_DURATION_SECS",
                    60,
                )),
                cleanup_interval: Duration::from_secs(env_u64(
                    "RATE_LIMIT_CLEANUP_INTERVAL_SECS",
                    3600,
                )),
            },
            rate_limit_exempt_admin: std::env::var("RATE_LIMIT_EXEMPT_ADMIN")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            ping_interval: Duration::from_secs(env_u64("HEARTBEAT_PING_INTERVAL_SECS", 10)),
            pong_deadline: Duration::from_secs(env_u64("HEARTBEAT_PONG_DEADLINE_SECS", 30)),
            access_log_capacity: env_usize("ACCESS_LOG_CAPACITY", 10_000),
            door_seeds: door_seeds_from_env(),
        }
    }
}

impl AppConfig {
    /// CORS origins as a list
    pub fn allowed_origins_list(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Door seeds from the `DOOR_SEEDS` JSON env var, or the built-in fleet
fn door_seeds_from_env() -> Vec<DoorSeed> {
    if let Ok(raw) = std::env::var("DOOR_SEEDS") {
        match serde_json::from_str(&raw) {
            Ok(seeds) => return seeds,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid DOOR_SEEDS, falling back to defaults");
            }
        }
    }
    default_door_seeds()
}

/// Built-in two-door fleet
pub fn default_door_seeds() -> Vec<DoorSeed> {
    vec![
        DoorSeed {
            door_id: "DOOR-001".to_string(),
            location: "Main Entrance".to_string(),
            device_type: DeviceType::Physical,
            physical_status: PhysicalStatus::Closed,
            lock_state: LockState::Locked,
        },
        DoorSeed {
            door_id: "DOOR-002".to_string(),
            location: "Conference Room A".to_string(),
            device_type: DeviceType::Virtual,
            physical_status: PhysicalStatus::Closed,
            lock_state: LockState::Unlocked,
        },
    ]
}

/// System health metrics
#[derive(Debug, Clone, Default)]
pub struct SystemHealth {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

impl SystemHealth {
    pub fn update(&mut self, cpu: f32, memory: f32) {
        self.cpu_percent = cpu;
        self.memory_percent = memory;
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Door fleet (SSoT)
    pub registry: Arc<DoorRegistry>,
    /// Audit trail ring buffer
    pub access_log: Arc<AccessLogService>,
    /// Brute-force guard
    pub rate_limiter: Arc<RateLimiter>,
    /// Dashboard fan-out
    pub hub: Arc<RealtimeHub>,
    /// Controller sessions
    pub controllers: Arc<ControllerGateway>,
    /// Authorization engine
    pub access_control: Arc<AccessControlService>,
    /// System health status
    pub system_health: Arc<RwLock<SystemHealth>>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Wire every service from configuration
    pub fn initialize(config: AppConfig) -> Self {
        let registry = Arc::new(DoorRegistry::new(&config.door_seeds));
        let access_log = Arc::new(AccessLogService::new(config.access_log_capacity));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let hub = Arc::new(RealtimeHub::new());
        let controllers = Arc::new(ControllerGateway::new());

        let access_control = Arc::new(AccessControlService::new(
            registry.clone(),
            access_log.clone(),
            rate_limiter.clone(),
            hub.clone(),
            CommandDispatcher::new(controllers.clone()),
            AccessPolicy {
                admin_user_id: config.admin_user_id.clone(),
                exempt_admin_from_rate_limit: config.rate_limit_exempt_admin,
            },
        ));

        Self {
            config,
            registry,
            access_log,
            rate_limiter,
            hub,
            controllers,
            access_control,
            system_health: Arc::new(RwLock::new(SystemHealth::default())),
            started_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_seeds_cover_both_kinds() {
        let seeds = default_door_seeds();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].device_type, DeviceType::Physical);
        assert_eq!(seeds[1].device_type, DeviceType::Virtual);
    }

    #[tokio::test]
    async fn test_initialize_seeds_registry() {
        let state = AppState::initialize(AppConfig::default());
        assert_eq!(state.registry.len().await, 2);
        assert!(state.registry.get("DOOR-001").await.is_some());
    }
}
