// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::traits::{check_index, IndexKey, IndexRange, Partition, StorageBackend, StorageError};

/// In-memory backend. Indexes are answered by scanning the partition.
pub struct InMemoryBackend {
    partitions: HashMap<Partition, DashMap<String, Value>>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: Partition::ALL
                .iter()
                .map(|p| (*p, DashMap::new()))
                .collect(),
        }
    }

    /// Number of records in a partition
    #[must_use]
    pub fn len(&self, partition: Partition) -> usize {
        self.partition(partition).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(DashMap::is_empty)
    }

    fn partition(&self, partition: Partition) -> &DashMap<String, Value> {
        // Every partition is created in new()
        &self.partitions[&partition]
    }

    fn scan<F>(&self, partition: Partition, mut keep: F) -> Vec<Value>
    where
        F: FnMut(&Value) -> bool,
    {
        let mut out: Vec<(String, Value)> = self
            .partition(partition)
            .iter()
            .filter(|r| keep(r.value()))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        // Key order, same as the SQL backend
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.into_iter().map(|(_, v)| v).collect()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn put(&self, partition: Partition, record: Value) -> Result<(), StorageError> {
        let key = partition.key_of(&record)?;
        self.partition(partition).insert(key, record);
        Ok(())
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.partition(partition).get(key).map(|r| r.value().clone()))
    }

    async fn get_all(&self, partition: Partition) -> Result<Vec<Value>, StorageError> {
        Ok(self.scan(partition, |_| true))
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError> {
        self.partition(partition).remove(key);
        Ok(())
    }

    async fn clear(&self, partition: Partition) -> Result<(), StorageError> {
        self.partition(partition).clear();
        Ok(())
    }

    async fn get_by_index(
        &self,
        partition: Partition,
        index: &str,
        value: &IndexKey,
    ) -> Result<Vec<Value>, StorageError> {
        check_index(partition, index)?;
        Ok(self.scan(partition, |r| {
            partition.index_key_of(index, r).as_ref() == Some(value)
        }))
    }

    async fn get_by_index_range(
        &self,
        partition: Partition,
        index: &str,
        range: &IndexRange,
    ) -> Result<Vec<Value>, StorageError> {
        check_index(partition, index)?;
        Ok(self.scan(partition, |r| {
            partition
                .index_key_of(index, r)
                .is_some_and(|k| range.contains(&k))
        }))
    }
}
