//! RateLimiter - Brute-Force Guard
//!
//! ## Responsibilities
//!
//! - Per-(door, user) sliding-window attempt counting
//! - Lockout after repeated failures
//! - Aggregate and per-user status reporting
//!
//! Windows run on a monotonic clock; wallclock only appears in the
//! reported remaining-seconds values.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Sliding window for the general attempt cap
const ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

/// Window for the hourly aggregate stats
const STATS_WINDOW: Duration = Duration::from_secs(3600);

/// Rate limiter tuning, loaded from configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts_per_minute: usize,
    pub max_failed_attempts: usize,
    pub lockout_duration: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_minute: 10,
            max_failed_attempts: 5,
            lockout_duration: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// Verdict of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    LockedOut { remaining_secs: u64 },
    RateLimited,
}

/// One recorded attempt; the (door, user) pair lives in the map key
#[derive(Debug, Clone)]
struct AttemptRecord {
    at: Instant,
    success: bool,
}

/// Aggregate counters for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub total_attempts_last_hour: usize,
    pub successful_attempts: usize,
    pub failed_attempts: usize,
    pub unique_users: usize,
    pub unique_devices: usize,
    pub total_records: usize,
    pub config: RateLimiterConfigInfo,
}

/// Config echo included in stats
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterConfigInfo {
    pub max_attempts_per_minute: usize,
    pub max_failed_attempts: usize,
    pub lockout_duration_secs: u64,
}

/// Per-(door, user) status for the user_status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct UserRateStatus {
    pub user_id: String,
    pub device_id: String,
    pub attempts_last_minute: usize,
    pub failed_attempts_recent: usize,
    pub is_locked_out: bool,
    pub remaining_lockout_seconds: u64,
}

/// RateLimiter instance
pub struct RateLimiter {
    attempts: RwLock<HashMap<(String, String), VecDeque<AttemptRecord>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter with the given tuning
    pub fn new(config: RateLimitConfig) -> Self {
        tracing::info!(
            max_attempts_per_minute = config.max_attempts_per_minute,
            max_failed_attempts = config.max_failed_attempts,
            lockout_duration_secs = config.lockout_duration.as_secs(),
            "Rate limiter initialized"
        );
        Self {
            attempts: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records older than this no longer influence any check, but are kept
    /// long enough to back the hourly stats endpoint.
    fn retention(&self) -> Duration {
        STATS_WINDOW.max(self.config.lockout_duration)
    }

    /// Check whether an attempt on `(device_id, user_id)` may proceed.
    ///
    /// Lockout is evaluated before the general attempt cap, so a locked-out
    /// pair always reports `locked_out` with its remaining time.
    pub async fn check(&self, device_id: &str, user_id: &str, command: &str) -> Verdict {
        let now = Instant::now();
        let key = (device_id.to_string(), user_id.to_string());
        let retention = self.retention();

        let mut attempts = self.attempts.write().await;
        let records = attempts.entry(key).or_default();

        // Opportunistic per-key prune
        while let Some(front) = records.front() {
            if now.duration_since(front.at) > retention {
                records.pop_front();
            } else {
                break;
            }
        }

        let recent_failed: Vec<&AttemptRecord> = records
            .iter()
            .filter(|r| !r.success && now.duration_since(r.at) <= self.config.lockout_duration)
            .collect();

        if recent_failed.len() >= self.config.max_failed_attempts {
            // Lockout expires relative to the most recent failure
            if let Some(last_failed) = recent_failed.last() {
                let expires = last_failed.at + self.config.lockout_duration;
                if expires > now {
                    let remaining_secs = expires.duration_since(now).as_secs().max(1);
                    tracing::warn!(
                        device_id = %device_id,
                        user_id = %user_id,
                        command = %command,
                        remaining_secs,
                        "Attempt denied: locked out"
                    );
                    return Verdict::LockedOut { remaining_secs };
                }
            }
        }

        let recent_total = records
            .iter()
            .filter(|r| now.duration_since(r.at) <= ATTEMPT_WINDOW)
            .count();

        if recent_total >= self.config.max_attempts_per_minute {
            tracing::warn!(
                device_id = %device_id,
                user_id = %user_id,
                command = %command,
                attempts = recent_total,
                "Attempt denied: rate limited"
            );
            return Verdict::RateLimited;
        }

        Verdict::Allowed
    }

    /// Record the outcome of an attempt
    pub async fn record(&self, device_id: &str, user_id: &str, command: &str, success: bool) {
        let mut attempts = self.attempts.write().await;
        attempts
            .entry((device_id.to_string(), user_id.to_string()))
            .or_default()
            .push_back(AttemptRecord {
                at: Instant::now(),
                success,
            });

        tracing::debug!(
            device_id = %device_id,
            user_id = %user_id,
            command = %command,
            success,
            "Attempt recorded"
        );
    }

    /// Drop records past the retention horizon; run on a schedule
    pub async fn sweep(&self) {
        let now = Instant::now();
        let retention = self.retention();
        let mut attempts = self.attempts.write().await;

        let mut removed = 0usize;
        attempts.retain(|_, records| {
            let before = records.len();
            records.retain(|r| now.duration_since(r.at) <= retention);
            removed += before - records.len();
            !records.is_empty()
        });

        if removed > 0 {
            tracing::info!(removed, "Swept expired rate limit records");
        }
    }

    /// Aggregate counters for the last hour
    pub async fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let attempts = self.attempts.read().await;

        let mut total_last_hour = 0usize;
        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut users: HashSet<&str> = HashSet::new();
        let mut devices: HashSet<&str> = HashSet::new();
        let mut total_records = 0usize;

        for ((device_id, user_id), records) in attempts.iter() {
            total_records += records.len();
            let mut any_recent = false;
            for record in records {
                if now.duration_since(record.at) <= STATS_WINDOW {
                    total_last_hour += 1;
                    any_recent = true;
                    if record.success {
                        successful += 1;
                    } else {
                        failed += 1;
                    }
                }
            }
            if any_recent {
                users.insert(user_id);
                devices.insert(device_id);
            }
        }

        RateLimiterStats {
            total_attempts_last_hour: total_last_hour,
            successful_attempts: successful,
            failed_attempts: failed,
            unique_users: users.len(),
            unique_devices: devices.len(),
            total_records,
            config: RateLimiterConfigInfo {
                max_attempts_per_minute: self.config.max_attempts_per_minute,
                max_failed_attempts: self.config.max_failed_attempts,
                lockout_duration_secs: self.config.lockout_duration.as_secs(),
            },
        }
    }

    /// Status for one (door, user) pair
    pub async fn user_status(&self, device_id: &str, user_id: &str) -> UserRateStatus {
        let now = Instant::now();
        let attempts = self.attempts.read().await;
        let key = (device_id.to_string(), user_id.to_string());

        let empty = VecDeque::new();
        let records = attempts.get(&key).unwrap_or(&empty);

        let attempts_last_minute = records
            .iter()
            .filter(|r| now.duration_since(r.at) <= ATTEMPT_WINDOW)
            .count();

        let recent_failed: Vec<&AttemptRecord> = records
            .iter()
            .filter(|r| !r.success && now.duration_since(r.at) <= self.config.lockout_duration)
            .collect();

        let mut is_locked_out = false;
        let mut remaining = 0u64;
        if recent_failed.len() >= self.config.max_failed_attempts {
            if let Some(last_failed) = recent_failed.last() {
                let expires = last_failed.at + self.config.lockout_duration;
                if expires > now {
                    is_locked_out = true;
                    remaining = expires.duration_since(now).as_secs().max(1);
                }
            }
        }

        UserRateStatus {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            attempts_last_minute,
            failed_attempts_recent: recent_failed.len(),
            is_locked_out,
            remaining_lockout_seconds: remaining,
        }
    }

    /// Wipe every record; returns how many were cleared
    pub async fn clear_all(&self) -> usize {
        let mut attempts = self.attempts.write().await;
        let cleared: usize = attempts.values().map(|records| records.len()).sum();
        attempts.clear();
        tracing::info!(cleared, "Rate limiter records cleared");
        cleared
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_per_minute: usize, max_failed: usize, lockout_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_attempts_per_minute: max_per_minute,
            max_failed_attempts: max_failed,
            lockout_duration: Duration::from_secs(lockout_secs),
            cleanup_interval: Duration::from_secs(3600),
        })
    }

    #[tokio::test]
    async fn test_allows_under_limits() {
        let limiter = limiter(10, 5, 60);
        assert_eq!(
            limiter.check("DOOR-001", "alice", "open").await,
            Verdict::Allowed
        );
    }

    #[tokio::test]
    async fn test_rate_limited_at_attempt_cap() {
        let limiter = limiter(3, 10, 60);
        for _ in 0..3 {
            limiter.record("DOOR-001", "alice", "open", true).await;
        }
        assert_eq!(
            limiter.check("DOOR-001", "alice", "open").await,
            Verdict::RateLimited
        );
    }

    #[tokio::test]
    async fn test_lockout_after_failures() {
        let limiter = limiter(100, 5, 60);
        for _ in 0..5 {
            limiter.record("DOOR-001", "mallory", "open", false).await;
        }

        match limiter.check("DOOR-001", "mallory", "open").await {
            Verdict::LockedOut { remaining_secs } => {
                assert!(remaining_secs >= 1 && remaining_secs <= 60);
            }
            other => panic!("expected lockout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lockout_checked_before_rate_limit() {
        let limiter = limiter(3, 3, 60);
        for _ in 0..3 {
            limiter.record("DOOR-001", "mallory", "open", false).await;
        }
        assert!(matches!(
            limiter.check("DOOR-001", "mallory", "open").await,
            Verdict::LockedOut { .. }
        ));
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let limiter = limiter(100, 5, 60);
        for _ in 0..5 {
            limiter.record("DOOR-001", "mallory", "open", false).await;
        }

        // Same door, different user
        assert_eq!(
            limiter.check("DOOR-001", "admin", "unlock").await,
            Verdict::Allowed
        );
        // Same user, different door
        assert_eq!(
            limiter.check("DOOR-002", "mallory", "open").await,
            Verdict::Allowed
        );
    }

    #[tokio::test]
    async fn test_successes_do_not_count_toward_lockout() {
        let limiter = limiter(100, 3, 60);
        for _ in 0..3 {
            limiter.record("DOOR-001", "alice", "open", true).await;
        }
        assert_eq!(
            limiter.check("DOOR-001", "alice", "open").await,
            Verdict::Allowed
        );
    }

    #[tokio::test]
    async fn test_user_status_reports_lockout() {
        let limiter = limiter(100, 2, 60);
        limiter.record("DOOR-001", "mallory", "open", false).await;
        limiter.record("DOOR-001", "mallory", "open", false).await;

        let status = limiter.user_status("DOOR-001", "mallory").await;
        assert_eq!(status.failed_attempts_recent, 2);
        assert!(status.is_locked_out);
        assert!(status.remaining_lockout_seconds >= 1);

        let clean = limiter.user_status("DOOR-001", "alice").await;
        assert!(!clean.is_locked_out);
        assert_eq!(clean.remaining_lockout_seconds, 0);
    }

    #[tokio::test]
    async fn test_stats_aggregates() {
        let limiter = limiter(100, 5, 60);
        limiter.record("DOOR-001", "alice", "open", true).await;
        limiter.record("DOOR-001", "bob", "open", false).await;
        limiter.record("DOOR-002", "alice", "close", true).await;

        let stats = limiter.stats().await;
        assert_eq!(stats.total_attempts_last_hour, 3);
        assert_eq!(stats.successful_attempts, 2);
        assert_eq!(stats.failed_attempts, 1);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.unique_devices, 2);
        assert_eq!(stats.total_records, 3);
    }

    #[tokio::test]
    async fn test_clear_all_resets_lockout() {
        let limiter = limiter(100, 2, 60);
        limiter.record("DOOR-001", "mallory", "open", false).await;
        limiter.record("DOOR-001", "mallory", "open", false).await;
        assert!(matches!(
            limiter.check("DOOR-001", "mallory", "open").await,
            Verdict::LockedOut { .. }
        ));

        let cleared = limiter.clear_all().await;
        assert_eq!(cleared, 2);
        assert_eq!(
            limiter.check("DOOR-001", "mallory", "open").await,
            Verdict::Allowed
        );
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_records() {
        let limiter = limiter(100, 5, 60);
        limiter.record("DOOR-001", "alice", "open", true).await;
        limiter.sweep().await;
        assert_eq!(limiter.stats().await.total_records, 1);
    }
}
