// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coordinator state, broadcast on a watch channel.
///
/// `Offline -> Replaying -> Idle -> Offline`. Queuing while `Idle` does not
/// start a replay on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No connectivity; writes accumulate in the queue
    Offline,
    /// Draining the queue against the network
    Replaying,
    /// Online with nothing in flight
    Idle,
}

impl SyncState {
    pub(crate) fn as_gauge(&self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Replaying => 1,
            Self::Idle => 2,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "Offline"),
            Self::Replaying => write!(f, "Replaying"),
            Self::Idle => write!(f, "Idle"),
        }
    }
}

/// Tally of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ReplayReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// How a conflicting server change should be settled for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    Client,
    Server,
    Manual,
}

/// Last confirmed replay for one entity, stored in `syncStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// `"{entity_type}:{entity_id}"`
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    /// Epoch millis of the last confirmed replay
    pub last_sync: i64,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_resolution: Option<ConflictResolution>,
}

impl SyncStatus {
    #[must_use]
    pub fn status_id(entity_type: &str, entity_id: &str) -> String {
        format!("{}:{}", entity_type, entity_id)
    }

    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>, version: i64, last_sync: i64) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self {
            id: Self::status_id(&entity_type, &entity_id),
            entity_type,
            entity_id,
            last_sync,
            version,
            conflict_resolution: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_display() {
        assert_eq!(format!("{}", SyncState::Offline), "Offline");
        assert_eq!(format!("{}", SyncState::Replaying), "Replaying");
        assert_eq!(SyncState::Idle.as_gauge(), 2);
    }

    #[test]
    fn test_sync_status_wire_shape() {
        let mut status = SyncStatus::new("vendor", "42", 3, 1_000);
        assert_eq!(status.id, "vendor:42");

        status.conflict_resolution = Some(ConflictResolution::Server);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["entityType"], "vendor");
        assert_eq!(value["lastSync"], 1_000);
        assert_eq!(value["conflictResolution"], "server");
    }
}
