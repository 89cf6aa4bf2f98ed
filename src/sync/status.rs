// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use tracing::debug;

use super::types::{ConflictResolution, SyncStatus};
use crate::now_millis;
use crate::storage::{IndexRange, Partition, StorageEngine, StorageError};

/// Typed access to the `syncStatus` partition.
#[derive(Clone)]
pub struct SyncStatusStore {
    storage: Arc<StorageEngine>,
}

impl SyncStatusStore {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    pub async fn upsert(&self, status: &SyncStatus) -> Result<(), StorageError> {
        self.storage.put(Partition::SyncStatus, status).await
    }

    pub async fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<SyncStatus>, StorageError> {
        self.storage
            .get(Partition::SyncStatus, &SyncStatus::status_id(entity_type, entity_id))
            .await
    }

    pub async fn statuses_for(&self, entity_type: &str) -> Result<Vec<SyncStatus>, StorageError> {
        self.storage
            .get_by_index(Partition::SyncStatus, "entityType", entity_type)
            .await
    }

    /// Entities whose last confirmed sync is strictly before `older_than`.
    pub async fn stale(&self, older_than: i64) -> Result<Vec<SyncStatus>, StorageError> {
        self.storage
            .get_by_index_range(Partition::SyncStatus, "lastSync", &IndexRange::below(older_than))
            .await
    }

    /// Record a confirmed replay. Uses the server's version when it sent one,
    /// otherwise bumps the stored version. Keeps any conflict resolution.
    pub async fn record_sync(
        &self,
        entity_type: &str,
        entity_id: &str,
        server_version: Option<i64>,
    ) -> Result<SyncStatus, StorageError> {
        let previous = self.get(entity_type, entity_id).await?;
        let version = server_version
            .unwrap_or_else(|| previous.as_ref().map_or(1, |p| p.version.saturating_add(1)));

        let mut status = SyncStatus::new(entity_type, entity_id, version, now_millis());
        status.conflict_resolution = previous.and_then(|p| p.conflict_resolution);

        self.upsert(&status).await?;
        debug!(id = %status.id, version, "Sync status updated");
        Ok(status)
    }

    /// Set the conflict policy for an entity that has synced before.
    /// `Ok(false)` if there is no status for it yet.
    pub async fn set_conflict_resolution(
        &self,
        entity_type: &str,
        entity_id: &str,
        resolution: ConflictResolution,
    ) -> Result<bool, StorageError> {
        let Some(mut status) = self.get(entity_type, entity_id).await? else {
            return Ok(false);
        };
        status.conflict_resolution = Some(resolution);
        self.upsert(&status).await?;
        Ok(true)
    }
}
