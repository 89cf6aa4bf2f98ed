// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable queue of writes made while offline.
//!
//! Mutations live in the `mutations` partition until a replay confirms
//! them. Replay order is priority descending, then oldest first.

pub mod mutation;

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

pub use mutation::{MutationDescriptor, OfflineMutation};

use crate::now_millis;
use crate::storage::{Partition, StorageEngine, StorageError};

pub struct MutationQueue {
    storage: Arc<StorageEngine>,
}

impl MutationQueue {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Persist a new mutation and return its id.
    pub async fn queue_mutation(&self, descriptor: MutationDescriptor) -> Result<String, StorageError> {
        let now = now_millis();
        let id = new_mutation_id(now);
        let mutation = descriptor.into_mutation(id.clone(), now);

        self.storage.put(Partition::Mutations, &mutation).await?;
        crate::metrics::record_mutation_queued(&mutation.method);
        info!(
            id = %id,
            method = %mutation.method,
            url = %mutation.url,
            priority = %mutation.priority,
            "Mutation queued"
        );
        Ok(id)
    }

    /// Every pending mutation in replay order.
    pub async fn get_mutation_queue(&self) -> Result<Vec<OfflineMutation>, StorageError> {
        let mut mutations: Vec<OfflineMutation> = self.storage.get_all(Partition::Mutations).await?;
        sort_for_replay(&mut mutations);
        crate::metrics::set_queue_depth(mutations.len());
        Ok(mutations)
    }

    pub async fn get(&self, id: &str) -> Result<Option<OfflineMutation>, StorageError> {
        self.storage.get(Partition::Mutations, id).await
    }

    /// Bump `retry_count` by one. `Ok(false)` if the mutation is gone.
    pub async fn increment_mutation_retry(&self, id: &str) -> Result<bool, StorageError> {
        let Some(mut mutation) = self.get(id).await? else {
            warn!(id = %id, "Retry increment for unknown mutation");
            return Ok(false);
        };
        mutation.retry_count = mutation.retry_count.saturating_add(1);
        self.storage.put(Partition::Mutations, &mutation).await?;
        debug!(id = %id, retry_count = mutation.retry_count, "Mutation retry recorded");
        Ok(true)
    }

    pub async fn remove_mutation(&self, id: &str) -> Result<(), StorageError> {
        self.storage.delete(Partition::Mutations, id).await?;
        debug!(id = %id, "Mutation removed");
        Ok(())
    }

    /// Number of mutations waiting for replay.
    pub async fn pending_count(&self) -> Result<usize, StorageError> {
        let size = self.storage.backend().partition_size(Partition::Mutations).await?;
        Ok(size.count as usize)
    }

    /// Pending mutations touching `entity_type`, in replay order.
    pub async fn mutations_for_entity(&self, entity_type: &str) -> Result<Vec<OfflineMutation>, StorageError> {
        let mut mutations: Vec<OfflineMutation> = self
            .storage
            .get_by_index(Partition::Mutations, "entityType", entity_type)
            .await?;
        sort_for_replay(&mut mutations);
        Ok(mutations)
    }
}

/// `mut_{millis}_{random}`
fn new_mutation_id(now: i64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("mut_{}_{}", now, &random[..12])
}

/// Priority descending, timestamp ascending, id as tie-break.
pub(crate) fn sort_for_replay(mutations: &mut [OfflineMutation]) {
    mutations.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    });
}
