//! AccessLogService - Audit Trail (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Store access events in a bounded ring buffer
//! - Assign a monotonic sequence to each entry
//! - Provide most-recent-first queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Outcome of an access attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Granted,
    Denied,
}

/// Commands a user or controller can request on a door
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessCommand {
    Open,
    Close,
    Lock,
    Unlock,
}

impl AccessCommand {
    /// Parse the lowercase wire form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "close" => Some(Self::Close),
            "lock" => Some(Self::Lock),
            "unlock" => Some(Self::Unlock),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }
}

impl std::fmt::Display for AccessCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logged record of an access attempt and its outcome.
///
/// `command` is a string rather than [`AccessCommand`] because audit
/// entries also cover non-command events such as heartbeat timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    /// Insertion sequence, monotonic for the process lifetime
    #[serde(skip)]
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub user_id: String,
    pub command: String,
    pub status: AccessStatus,
    pub message: String,
}

/// Ring buffer for events
struct EventRingBuffer {
    events: VecDeque<AccessEvent>,
    capacity: usize,
    next_sequence: u64,
}

impl EventRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 1,
        }
    }

    fn push(&mut self, mut event: AccessEvent) -> u64 {
        event.sequence = self.next_sequence;
        self.next_sequence += 1;

        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.next_sequence - 1
    }

    fn latest(&self, count: usize) -> Vec<AccessEvent> {
        self.events.iter().rev().take(count).cloned().collect()
    }

    fn latest_for_device(&self, device_id: &str, count: usize) -> Vec<AccessEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.device_id == device_id)
            .take(count)
            .cloned()
            .collect()
    }
}

/// AccessLogService instance
pub struct AccessLogService {
    buffer: RwLock<EventRingBuffer>,
}

impl AccessLogService {
    /// Create a log bounded to `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(EventRingBuffer::new(capacity)),
        }
    }

    /// Append an event, returning its sequence
    pub async fn append(&self, event: AccessEvent) -> u64 {
        let mut buffer = self.buffer.write().await;
        let sequence = buffer.push(event);
        tracing::debug!(sequence, "Access event appended");
        sequence
    }

    /// Most recent events, newest first
    pub async fn latest(&self, count: usize) -> Vec<AccessEvent> {
        let buffer = self.buffer.read().await;
        buffer.latest(count)
    }

    /// Most recent events for one door, newest first
    pub async fn latest_for_device(&self, device_id: &str, count: usize) -> Vec<AccessEvent> {
        let buffer = self.buffer.read().await;
        buffer.latest_for_device(device_id, count)
    }

    /// Number of retained entries
    pub async fn len(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer.events.len()
    }

    /// Retention ceiling
    pub async fn capacity(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(device_id: &str, message: &str) -> AccessEvent {
        AccessEvent {
            sequence: 0,
            timestamp: Utc::now(),
            device_id: device_id.into(),
            user_id: "alice".into(),
            command: "open".into(),
            status: AccessStatus::Granted,
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_monotonic_sequence() {
        let log = AccessLogService::new(10);
        let first = log.append(event("DOOR-001", "a")).await;
        let second = log.append(event("DOOR-001", "b")).await;
        assert_eq!(second, first + 1);
    }

    #[tokio::test]
    async fn test_latest_is_most_recent_first() {
        let log = AccessLogService::new(10);
        log.append(event("DOOR-001", "first")).await;
        log.append(event("DOOR-001", "second")).await;

        let events = log.latest(10).await;
        assert_eq!(events[0].message, "second");
        assert_eq!(events[1].message, "first");
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let log = AccessLogService::new(3);
        for i in 0..5 {
            log.append(event("DOOR-001", &format!("e{i}"))).await;
        }

        assert_eq!(log.len().await, 3);
        let events = log.latest(10).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "e4");
        assert_eq!(events[2].message, "e2");
    }

    #[tokio::test]
    async fn test_latest_for_device_filters() {
        let log = AccessLogService::new(10);
        log.append(event("DOOR-001", "a")).await;
        log.append(event("DOOR-002", "b")).await;
        log.append(event("DOOR-001", "c")).await;

        let events = log.latest_for_device("DOOR-001", 10).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.device_id == "DOOR-001"));
    }

    #[test]
    fn test_command_parse_round_trip() {
        for raw in ["open", "close", "lock", "unlock"] {
            assert_eq!(AccessCommand::parse(raw).unwrap().as_str(), raw);
        }
        assert!(AccessCommand::parse("explode").is_none());
    }
}
