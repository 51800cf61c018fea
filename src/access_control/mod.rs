//! AccessControlService - Authorization Engine
//!
//! ## Responsibilities
//!
//! - Rate limit and device resolution pre-checks
//! - Role, lock, and device-kind command rules
//! - Outcome recording (rate limiter + audit log) and broadcasting
//!
//! ## Design
//!
//! Every attempt takes the attempt gate for its whole decide-and-mutate
//! span, so read-modify-write sequences (no-op detection, lock checks)
//! never interleave. Broadcast order per attempt: device_state_change
//! first, access_event second.

use crate::access_log::{AccessCommand, AccessEvent, AccessLogService, AccessStatus};
use crate::command_dispatcher::CommandDispatcher;
use crate::door_registry::{DeviceType, Door, DoorRegistry, LockState, PhysicalStatus};
use crate::rate_limiter::{RateLimiter, Verdict};
use crate::realtime_hub::{DeviceStateChangeMessage, HubMessage, RealtimeHub};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

/// User id carried by controller-originated button attempts
pub const BUTTON_USER_ID: &str = "physical_button";

/// Authorization policy knobs
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub admin_user_id: String,
    pub exempt_admin_from_rate_limit: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            admin_user_id: "admin".to_string(),
            exempt_admin_from_rate_limit: false,
        }
    }
}

/// Outcome of one access attempt
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub status: AccessStatus,
    pub message: String,
    /// Door state to echo to the caller; `None` on denial
    pub door: Option<Door>,
}

impl AccessDecision {
    pub fn granted(&self) -> bool {
        self.status == AccessStatus::Granted
    }
}

/// Command-rule result before it is recorded and broadcast
struct RuleOutcome {
    status: AccessStatus,
    message: String,
    /// State that actually changed and must be broadcast
    changed: Option<Door>,
    /// Current state echoed on grants that changed nothing
    unchanged: Option<Door>,
}

impl RuleOutcome {
    fn denied(message: impl Into<String>) -> Self {
        Self {
            status: AccessStatus::Denied,
            message: message.into(),
            changed: None,
            unchanged: None,
        }
    }

    fn no_op(door: Door) -> Self {
        Self {
            status: AccessStatus::Granted,
            message: "no_op".to_string(),
            changed: None,
            unchanged: Some(door),
        }
    }

    fn mutated(message: impl Into<String>, door: Door) -> Self {
        Self {
            status: AccessStatus::Granted,
            message: message.into(),
            changed: Some(door),
            unchanged: None,
        }
    }

    fn dispatched(message: impl Into<String>, door: Door) -> Self {
        Self {
            status: AccessStatus::Granted,
            message: message.into(),
            changed: None,
            unchanged: Some(door),
        }
    }
}

/// AccessControlService instance
pub struct AccessControlService {
    registry: Arc<DoorRegistry>,
    access_log: Arc<AccessLogService>,
    limiter: Arc<RateLimiter>,
    hub: Arc<RealtimeHub>,
    dispatcher: CommandDispatcher,
    policy: AccessPolicy,
    /// Serializes decide-and-mutate spans across all attempt sources
    attempt_gate: Mutex<()>,
}

impl AccessControlService {
    /// Create new AccessControlService
    pub fn new(
        registry: Arc<DoorRegistry>,
        access_log: Arc<AccessLogService>,
        limiter: Arc<RateLimiter>,
        hub: Arc<RealtimeHub>,
        dispatcher: CommandDispatcher,
        policy: AccessPolicy,
    ) -> Self {
        Self {
            registry,
            access_log,
            limiter,
            hub,
            dispatcher,
            policy,
            attempt_gate: Mutex::new(()),
        }
    }

    /// Process one access attempt end to end.
    ///
    /// Every outcome is recorded in the rate limiter and the audit log and
    /// broadcast to observers; `device_offline` is substituted before
    /// anything is observable when dispatch finds no controller.
    pub async fn process_attempt(
        &self,
        device_id: &str,
        user_id: &str,
        command: AccessCommand,
    ) -> AccessDecision {
        let _gate = self.attempt_gate.lock().await;

        let is_admin = user_id.eq_ignore_ascii_case(&self.policy.admin_user_id);
        let is_button = user_id == BUTTON_USER_ID;

        if !(self.policy.exempt_admin_from_rate_limit && is_admin) {
            match self.limiter.check(device_id, user_id, command.as_str()).await {
                Verdict::LockedOut { remaining_secs } => {
                    let outcome =
                        RuleOutcome::denied(format!("locked_out ({remaining_secs}s remaining)"));
                    return self
                        .conclude(device_id, user_id, command, is_button, outcome)
                        .await;
                }
                Verdict::RateLimited => {
                    let outcome = RuleOutcome::denied("rate_limited");
                    return self
                        .conclude(device_id, user_id, command, is_button, outcome)
                        .await;
                }
                Verdict::Allowed => {}
            }
        }

        let Some(door) = self.registry.get(device_id).await else {
            let outcome = RuleOutcome::denied("unknown_device");
            return self
                .conclude(device_id, user_id, command, is_button, outcome)
                .await;
        };

        let outcome = match command {
            AccessCommand::Open => self.apply_open(&door, is_admin, is_button).await,
            AccessCommand::Close => self.apply_close(&door).await,
            AccessCommand::Lock => self.apply_lock(&door, is_admin).await,
            AccessCommand::Unlock => self.apply_unlock(&door, is_admin).await,
        };

        self.conclude(device_id, user_id, command, is_button, outcome)
            .await
    }

    async fn apply_open(&self, door: &Door, is_admin: bool, is_button: bool) -> RuleOutcome {
        // Buttons never override the lock
        let can_override_lock = is_admin && !is_button;
        if door.lock_state == LockState::Locked && !can_override_lock {
            return RuleOutcome::denied("door_locked");
        }

        if door.physical_status == PhysicalStatus::Open {
            return RuleOutcome::no_op(door.clone());
        }

        match door.device_type {
            DeviceType::Virtual => {
                match self
                    .registry
                    .set_physical_status(&door.door_id, PhysicalStatus::Open)
                    .await
                {
                    Some(updated) => RuleOutcome::mutated("door opened", updated),
                    None => RuleOutcome::denied("unknown_device"),
                }
            }
            DeviceType::Physical => {
                match self.dispatcher.dispatch(&door.door_id, AccessCommand::Open).await {
                    Ok(()) => RuleOutcome::dispatched("open dispatched to controller", door.clone()),
                    Err(_) => RuleOutcome::denied("device_offline"),
                }
            }
        }
    }

    async fn apply_close(&self, door: &Door) -> RuleOutcome {
        if door.physical_status == PhysicalStatus::Closed {
            return RuleOutcome::no_op(door.clone());
        }

        match door.device_type {
            DeviceType::Virtual => {
                match self
                    .registry
                    .set_physical_status(&door.door_id, PhysicalStatus::Closed)
                    .await
                {
                    Some(updated) => RuleOutcome::mutated("door closed", updated),
                    None => RuleOutcome::denied("unknown_device"),
                }
            }
            DeviceType::Physical => {
                match self.dispatcher.dispatch(&door.door_id, AccessCommand::Close).await {
                    Ok(()) => {
                        RuleOutcome::dispatched("close dispatched to controller", door.clone())
                    }
                    Err(_) => RuleOutcome::denied("device_offline"),
                }
            }
        }
    }

    async fn apply_lock(&self, door: &Door, is_admin: bool) -> RuleOutcome {
        if !is_admin {
            return RuleOutcome::denied("not_permitted");
        }

        if door.lock_state == LockState::Locked {
            return RuleOutcome::no_op(door.clone());
        }

        // The lock is a server concept; no controller dispatch for either kind
        match self
            .registry
            .set_lock_state(&door.door_id, LockState::Locked)
            .await
        {
            Some(updated) => RuleOutcome::mutated("door locked", updated),
            None => RuleOutcome::denied("unknown_device"),
        }
    }

    async fn apply_unlock(&self, door: &Door, is_admin: bool) -> RuleOutcome {
        if !is_admin {
            return RuleOutcome::denied("not_permitted");
        }

        if door.lock_state == LockState::Unlocked {
            return RuleOutcome::no_op(door.clone());
        }

        match self
            .registry
            .set_lock_state(&door.door_id, LockState::Unlocked)
            .await
        {
            Some(updated) => RuleOutcome::mutated("door unlocked", updated),
            None => RuleOutcome::denied("unknown_device"),
        }
    }

    /// Record and broadcast one finished attempt
    async fn conclude(
        &self,
        device_id: &str,
        user_id: &str,
        command: AccessCommand,
        is_button: bool,
        outcome: RuleOutcome,
    ) -> AccessDecision {
        let granted = outcome.status == AccessStatus::Granted;

        self.limiter
            .record(device_id, user_id, command.as_str(), granted)
            .await;

        let mut event = AccessEvent {
            sequence: 0,
            timestamp: Utc::now(),
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            command: command.as_str().to_string(),
            status: outcome.status,
            message: outcome.message.clone(),
        };
        event.sequence = self.access_log.append(event.clone()).await;

        // State change strictly before its access event
        if let Some(door) = &outcome.changed {
            self.hub
                .broadcast(HubMessage::DeviceStateChange(DeviceStateChangeMessage {
                    device_id: device_id.to_string(),
                    new_state: door.clone(),
                    timestamp: Utc::now(),
                }))
                .await;
        }
        self.hub.broadcast(HubMessage::AccessEvent(event)).await;

        if is_button && !granted {
            self.dispatcher
                .notify_denied(device_id, command, &outcome.message)
                .await;
        }

        if granted {
            tracing::info!(
                device_id = %device_id,
                user_id = %user_id,
                command = %command,
                message = %outcome.message,
                "Access granted"
            );
        } else {
            tracing::warn!(
                device_id = %device_id,
                user_id = %user_id,
                command = %command,
                message = %outcome.message,
                "Access denied"
            );
        }

        let door = outcome.changed.or(outcome.unchanged);
        AccessDecision {
            status: outcome.status,
            message: outcome.message,
            door,
        }
    }
}
