//! Doorhub - Smart Door Access Control Coordinator
//!
//! ## Architecture (8 Components)
//!
//! 1. DoorRegistry - SSoT for the door fleet
//! 2. AccessLogService - Audit trail ring buffer
//! 3. RateLimiter - Sliding-window brute-force guard
//! 4. RealtimeHub - Dashboard WebSocket fan-out
//! 5. ControllerGateway - Device sessions and heartbeats
//! 6. AccessControlService - Authorization engine
//! 7. CommandDispatcher - Controller actuation adapter
//! 8. WebAPI - HTTP and WebSocket ingress
//!
//! ## Design Principles
//!
//! - SSoT: the registry owns device state, the server owns lock state
//! - Single writer: attempts serialize through the authorization engine
//! - Fire-and-forget dispatch: controllers confirm before state moves

pub mod access_control;
pub mod access_log;
pub mod command_dispatcher;
pub mod controller_gateway;
pub mod door_registry;
pub mod error;
pub mod models;
pub mod rate_limiter;
pub mod realtime_hub;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
