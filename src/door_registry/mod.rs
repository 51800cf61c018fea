//! DoorRegistry - Device State Store
//!
//! ## Responsibilities
//!
//! - Hold the door fleet seeded from configuration
//! - Atomic single-field state updates under one lock
//! - Connection status transitions for physical doors

mod types;

pub use types::*;

use std::collections::HashMap;
use tokio::sync::RwLock;

/// Doors plus their seed order, kept together under one lock so
/// `list` stays consistent with membership.
struct DoorTable {
    doors: HashMap<String, Door>,
    order: Vec<String>,
}

/// DoorRegistry instance
pub struct DoorRegistry {
    table: RwLock<DoorTable>,
}

impl DoorRegistry {
    /// Create a registry populated from seed records.
    ///
    /// Doors are never destroyed after this point; a duplicate id in the
    /// seed list replaces the earlier record.
    pub fn new(seeds: &[DoorSeed]) -> Self {
        let mut doors = HashMap::new();
        let mut order = Vec::new();

        for seed in seeds {
            let door = Door::from_seed(seed);
            if doors.insert(door.door_id.clone(), door).is_none() {
                order.push(seed.door_id.clone());
            }
            tracing::info!(
                door_id = %seed.door_id,
                device_type = ?seed.device_type,
                location = %seed.location,
                "Door registered"
            );
        }

        Self {
            table: RwLock::new(DoorTable { doors, order }),
        }
    }

    /// Get a door by id
    pub async fn get(&self, door_id: &str) -> Option<Door> {
        let table = self.table.read().await;
        table.doors.get(door_id).cloned()
    }

    /// All doors in seed order
    pub async fn list(&self) -> Vec<Door> {
        let table = self.table.read().await;
        table
            .order
            .iter()
            .filter_map(|id| table.doors.get(id).cloned())
            .collect()
    }

    /// Number of registered doors
    pub async fn len(&self) -> usize {
        let table = self.table.read().await;
        table.doors.len()
    }

    /// Set the physical status of a door and return the updated door.
    ///
    /// Returns `None` for an unknown id.
    pub async fn set_physical_status(
        &self,
        door_id: &str,
        status: PhysicalStatus,
    ) -> Option<Door> {
        let mut table = self.table.write().await;
        let door = table.doors.get_mut(door_id)?;
        door.physical_status = status;
        tracing::debug!(door_id = %door_id, physical_status = ?status, "Physical status updated");
        Some(door.clone())
    }

    /// Set the lock state of a door and return the updated door.
    pub async fn set_lock_state(&self, door_id: &str, state: LockState) -> Option<Door> {
        let mut table = self.table.write().await;
        let door = table.doors.get_mut(door_id)?;
        door.lock_state = state;
        tracing::debug!(door_id = %door_id, lock_state = ?state, "Lock state updated");
        Some(door.clone())
    }

    /// Set the connection status of a physical door and return the updated door.
    ///
    /// Virtual doors are permanently online; the write is refused for them.
    pub async fn set_connection_status(
        &self,
        door_id: &str,
        status: ConnectionStatus,
    ) -> Option<Door> {
        let mut table = self.table.write().await;
        let door = table.doors.get_mut(door_id)?;

        if door.device_type == DeviceType::Virtual {
            tracing::warn!(door_id = %door_id, "Ignoring connection status write on virtual door");
            return Some(door.clone());
        }

        let prev = door.connection_status;
        door.connection_status = status;

        match (prev, status) {
            (ConnectionStatus::Online, ConnectionStatus::Offline) => {
                tracing::warn!(door_id = %door_id, "Controller connection lost");
            }
            (ConnectionStatus::Offline, ConnectionStatus::Online)
            | (ConnectionStatus::Unknown, ConnectionStatus::Online) => {
                tracing::info!(door_id = %door_id, "Controller connection established");
            }
            _ => {}
        }

        Some(door.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds() -> Vec<DoorSeed> {
        vec![
            DoorSeed {
                door_id: "DOOR-001".into(),
                location: "Main Entrance".into(),
                device_type: DeviceType::Physical,
                physical_status: PhysicalStatus::Closed,
                lock_state: LockState::Locked,
            },
            DoorSeed {
                door_id: "DOOR-002".into(),
                location: "Conference Room A".into(),
                device_type: DeviceType::Virtual,
                physical_status: PhysicalStatus::Closed,
                lock_state: LockState::Unlocked,
            },
        ]
    }

    #[tokio::test]
    async fn test_seed_order_preserved() {
        let registry = DoorRegistry::new(&seeds());
        let doors = registry.list().await;
        assert_eq!(doors.len(), 2);
        assert_eq!(doors[0].door_id, "DOOR-001");
        assert_eq!(doors[1].door_id, "DOOR-002");
    }

    #[tokio::test]
    async fn test_physical_door_starts_offline() {
        let registry = DoorRegistry::new(&seeds());
        let door = registry.get("DOOR-001").await.unwrap();
        assert_eq!(door.connection_status, ConnectionStatus::Offline);
    }

    #[tokio::test]
    async fn test_virtual_door_always_online() {
        let registry = DoorRegistry::new(&seeds());
        let door = registry.get("DOOR-002").await.unwrap();
        assert_eq!(door.connection_status, ConnectionStatus::Online);

        let door = registry
            .set_connection_status("DOOR-002", ConnectionStatus::Offline)
            .await
            .unwrap();
        assert_eq!(door.connection_status, ConnectionStatus::Online);
    }

    #[tokio::test]
    async fn test_update_unknown_door_is_none() {
        let registry = DoorRegistry::new(&seeds());
        assert!(registry
            .set_physical_status("DOOR-404", PhysicalStatus::Open)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_set_physical_status() {
        let registry = DoorRegistry::new(&seeds());
        let door = registry
            .set_physical_status("DOOR-002", PhysicalStatus::Open)
            .await
            .unwrap();
        assert_eq!(door.physical_status, PhysicalStatus::Open);
        assert_eq!(
            registry.get("DOOR-002").await.unwrap().physical_status,
            PhysicalStatus::Open
        );
    }

    #[tokio::test]
    async fn test_connection_transition() {
        let registry = DoorRegistry::new(&seeds());
        let door = registry
            .set_connection_status("DOOR-001", ConnectionStatus::Online)
            .await
            .unwrap();
        assert_eq!(door.connection_status, ConnectionStatus::Online);

        let door = registry
            .set_connection_status("DOOR-001", ConnectionStatus::Offline)
            .await
            .unwrap();
        assert_eq!(door.connection_status, ConnectionStatus::Offline);
    }
}
