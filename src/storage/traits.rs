// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;
use std::ops::Bound;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The partition could not be opened or written.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Named record collections. Each partition fixes its primary key field
/// and the secondary indexes maintained for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Partition {
    Cache,
    Mutations,
    SyncStatus,
    UserPreferences,
    FileCache,
}

impl Partition {
    pub const ALL: [Partition; 5] = [
        Partition::Cache,
        Partition::Mutations,
        Partition::SyncStatus,
        Partition::UserPreferences,
        Partition::FileCache,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Mutations => "mutations",
            Self::SyncStatus => "syncStatus",
            Self::UserPreferences => "userPreferences",
            Self::FileCache => "fileCache",
        }
    }

    /// Field of the record holding its primary key.
    #[must_use]
    pub fn key_field(&self) -> &'static str {
        match self {
            Self::Cache | Self::Mutations | Self::SyncStatus => "id",
            Self::UserPreferences => "key",
            Self::FileCache => "url",
        }
    }

    /// Secondary indexes; the index name is also the record field it reads.
    #[must_use]
    pub fn indexes(&self) -> &'static [&'static str] {
        match self {
            Self::Cache => &["expiry"],
            Self::Mutations => &["timestamp", "priority", "entityType"],
            Self::SyncStatus => &["entityType", "lastSync"],
            Self::UserPreferences => &[],
            Self::FileCache => &["timestamp"],
        }
    }

    #[must_use]
    pub fn has_index(&self, index: &str) -> bool {
        self.indexes().contains(&index)
    }

    /// Extract the primary key of a record.
    pub fn key_of(&self, record: &Value) -> Result<String, StorageError> {
        match record.get(self.key_field()) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(StorageError::Serialization(format!(
                "record for partition '{}' has no '{}' key",
                self.name(),
                self.key_field()
            ))),
        }
    }

    /// Extract the value of `index` from a record. Records with a missing
    /// or null field are not part of that index.
    #[must_use]
    pub fn index_key_of(&self, index: &str, record: &Value) -> Option<IndexKey> {
        record.get(index).and_then(IndexKey::from_json)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value stored in a secondary index. Integers sort before text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Int(i64),
    Text(String),
}

impl IndexKey {
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(IndexKey::Int),
            Value::String(s) => Some(IndexKey::Text(s.clone())),
            Value::Bool(b) => Some(IndexKey::Int(i64::from(*b))),
            _ => None,
        }
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        IndexKey::Int(v)
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        IndexKey::Text(v.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(v: String) -> Self {
        IndexKey::Text(v)
    }
}

/// Range over index values, in the style of `std::ops::RangeBounds`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRange {
    pub lower: Bound<IndexKey>,
    pub upper: Bound<IndexKey>,
}

impl IndexRange {
    /// Values `<= upper`.
    pub fn at_most(upper: impl Into<IndexKey>) -> Self {
        Self { lower: Bound::Unbounded, upper: Bound::Included(upper.into()) }
    }

    /// Values `< upper`.
    pub fn below(upper: impl Into<IndexKey>) -> Self {
        Self { lower: Bound::Unbounded, upper: Bound::Excluded(upper.into()) }
    }

    /// Values `>= lower`.
    pub fn at_least(lower: impl Into<IndexKey>) -> Self {
        Self { lower: Bound::Included(lower.into()), upper: Bound::Unbounded }
    }

    /// Values in `[lower, upper]`.
    pub fn between(lower: impl Into<IndexKey>, upper: impl Into<IndexKey>) -> Self {
        Self { lower: Bound::Included(lower.into()), upper: Bound::Included(upper.into()) }
    }

    #[must_use]
    pub fn contains(&self, key: &IndexKey) -> bool {
        let above_lower = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below_upper = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above_lower && below_upper
    }
}

/// Approximate footprint of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSize {
    pub partition: Partition,
    pub count: u64,
    /// Sum of serialized record lengths.
    pub size_bytes: u64,
}

/// Durable, partitioned record storage. No caching policy lives here.
///
/// Every operation is atomic at the single-record level; there are no
/// multi-record transactions.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert or overwrite by primary key.
    async fn put(&self, partition: Partition, record: Value) -> Result<(), StorageError>;

    /// Missing keys are `Ok(None)`, never an error.
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StorageError>;

    async fn get_all(&self, partition: Partition) -> Result<Vec<Value>, StorageError>;

    /// Deleting a missing key is a no-op.
    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError>;

    async fn clear(&self, partition: Partition) -> Result<(), StorageError>;

    async fn get_by_index(
        &self,
        partition: Partition,
        index: &str,
        value: &IndexKey,
    ) -> Result<Vec<Value>, StorageError>;

    async fn get_by_index_range(
        &self,
        partition: Partition,
        index: &str,
        range: &IndexRange,
    ) -> Result<Vec<Value>, StorageError>;

    /// Count and serialized size of a partition.
    /// Default implementation serializes every record.
    async fn partition_size(&self, partition: Partition) -> Result<PartitionSize, StorageError> {
        let records = self.get_all(partition).await?;
        let size_bytes = records
            .iter()
            .map(|r| serde_json::to_vec(r).map(|b| b.len() as u64))
            .sum::<Result<u64, _>>()?;
        Ok(PartitionSize {
            partition,
            count: records.len() as u64,
            size_bytes,
        })
    }
}

/// Reject index names the partition does not declare.
pub(crate) fn check_index(partition: Partition, index: &str) -> Result<(), StorageError> {
    if partition.has_index(index) {
        Ok(())
    } else {
        Err(StorageError::Backend(format!(
            "partition '{}' has no index '{}'",
            partition, index
        )))
    }
}
