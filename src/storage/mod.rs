// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Partitioned record storage.
//!
//! [`StorageBackend`] is the capability the platform provides (SQLite on
//! disk, or memory for tests). [`StorageEngine`] is the typed facade the
//! cache manager, mutation queue and sync coordinator share.

pub mod memory;
pub mod sql;
pub mod traits;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub use memory::InMemoryBackend;
pub use sql::SqliteBackend;
pub use traits::{IndexKey, IndexRange, Partition, PartitionSize, StorageBackend, StorageError};

use crate::now_millis;

/// Binary asset kept in the `fileCache` partition. Evicted by age only,
/// independently of the TTL cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub url: String,
    #[serde(with = "blob_base64")]
    pub blob: Vec<u8>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UserPreference {
    key: String,
    value: Value,
}

/// Full dump of every partition. Diagnostic/backup surface only; the
/// layout is not versioned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseExport {
    pub exported_at: i64,
    pub partitions: BTreeMap<Partition, Vec<Value>>,
}

impl DatabaseExport {
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.partitions.values().map(Vec::len).sum()
    }
}

pub struct StorageEngine {
    backend: Arc<dyn StorageBackend>,
}

impl StorageEngine {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Engine over a fresh [`InMemoryBackend`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }

    /// Engine over a SQLite database at `url`.
    pub async fn sqlite(url: &str) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(SqliteBackend::new(url).await?)))
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub async fn put<T: Serialize>(&self, partition: Partition, record: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(record)?;
        if !value.is_object() {
            return Err(StorageError::Serialization(format!(
                "records in '{}' must be objects",
                partition
            )));
        }
        self.backend.put(partition, value).await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        partition: Partition,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.backend.get(partition, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_all<T: DeserializeOwned>(&self, partition: Partition) -> Result<Vec<T>, StorageError> {
        decode_all(self.backend.get_all(partition).await?)
    }

    pub async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError> {
        self.backend.delete(partition, key).await
    }

    pub async fn clear(&self, partition: Partition) -> Result<(), StorageError> {
        self.backend.clear(partition).await
    }

    pub async fn get_by_index<T: DeserializeOwned>(
        &self,
        partition: Partition,
        index: &str,
        value: impl Into<IndexKey>,
    ) -> Result<Vec<T>, StorageError> {
        decode_all(self.backend.get_by_index(partition, index, &value.into()).await?)
    }

    pub async fn get_by_index_range<T: DeserializeOwned>(
        &self,
        partition: Partition,
        index: &str,
        range: &IndexRange,
    ) -> Result<Vec<T>, StorageError> {
        decode_all(self.backend.get_by_index_range(partition, index, range).await?)
    }

    /// Approximate size of every partition.
    pub async fn database_size(&self) -> Result<Vec<PartitionSize>, StorageError> {
        let mut sizes = Vec::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            sizes.push(self.backend.partition_size(partition).await?);
        }
        Ok(sizes)
    }

    /// Sum of [`database_size`](Self::database_size) across partitions.
    pub async fn total_size_bytes(&self) -> Result<u64, StorageError> {
        Ok(self.database_size().await?.iter().map(|s| s.size_bytes).sum())
    }

    pub async fn export_all(&self) -> Result<DatabaseExport, StorageError> {
        let mut partitions = BTreeMap::new();
        for partition in Partition::ALL {
            partitions.insert(partition, self.backend.get_all(partition).await?);
        }
        let export = DatabaseExport {
            exported_at: now_millis(),
            partitions,
        };
        info!(records = export.record_count(), "Database exported");
        Ok(export)
    }

    /// Restore a dump. Each partition present in the dump is cleared first;
    /// partitions absent from it are left alone.
    pub async fn import_all(&self, data: &DatabaseExport) -> Result<usize, StorageError> {
        let mut imported = 0;
        for (partition, records) in &data.partitions {
            self.backend.clear(*partition).await?;
            for record in records {
                self.backend.put(*partition, record.clone()).await?;
                imported += 1;
            }
            debug!(partition = %partition, records = records.len(), "Partition imported");
        }
        info!(records = imported, "Database imported");
        Ok(imported)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // User preferences
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn set_preference(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let pref = UserPreference { key: key.to_string(), value };
        self.put(Partition::UserPreferences, &pref).await
    }

    pub async fn get_preference(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let pref: Option<UserPreference> = self.get(Partition::UserPreferences, key).await?;
        Ok(pref.map(|p| p.value))
    }

    pub async fn remove_preference(&self, key: &str) -> Result<(), StorageError> {
        self.delete(Partition::UserPreferences, key).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // File cache
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn cache_file(&self, url: &str, blob: Vec<u8>) -> Result<(), StorageError> {
        let file = CachedFile {
            url: url.to_string(),
            blob,
            timestamp: now_millis(),
        };
        self.put(Partition::FileCache, &file).await
    }

    pub async fn get_cached_file(&self, url: &str) -> Result<Option<CachedFile>, StorageError> {
        self.get(Partition::FileCache, url).await
    }

    /// Delete files cached strictly before `cutoff` (epoch millis).
    pub async fn delete_files_older_than(&self, cutoff: i64) -> Result<usize, StorageError> {
        let stale = self
            .backend
            .get_by_index_range(Partition::FileCache, "timestamp", &IndexRange::below(cutoff))
            .await?;
        let mut removed = 0;
        for record in &stale {
            let url = Partition::FileCache.key_of(record)?;
            self.backend.delete(Partition::FileCache, &url).await?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, cutoff, "Stale cached files removed");
        }
        Ok(removed)
    }
}

fn decode_all<T: DeserializeOwned>(values: Vec<Value>) -> Result<Vec<T>, StorageError> {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(StorageError::from))
        .collect()
}

mod blob_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(blob))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_typed_put_get() {
        let engine = StorageEngine::in_memory();
        engine.set_preference("theme", json!({"mode": "dark"})).await.unwrap();

        assert_eq!(engine.get_preference("theme").await.unwrap(), Some(json!({"mode": "dark"})));
        assert_eq!(engine.get_preference("missing").await.unwrap(), None);

        engine.remove_preference("theme").await.unwrap();
        assert_eq!(engine.get_preference("theme").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_rejects_non_object() {
        let engine = StorageEngine::in_memory();
        let result = engine.put(Partition::Cache, &"just a string").await;
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_file_cache_roundtrip_and_age_eviction() {
        let engine = StorageEngine::in_memory();
        engine.cache_file("https://cdn/logo.png", vec![0, 159, 146, 150]).await.unwrap();

        let old = CachedFile {
            url: "https://cdn/old.png".to_string(),
            blob: vec![1, 2, 3],
            timestamp: 1_000,
        };
        engine.put(Partition::FileCache, &old).await.unwrap();

        let file = engine.get_cached_file("https://cdn/logo.png").await.unwrap().unwrap();
        assert_eq!(file.blob, vec![0, 159, 146, 150]);

        let removed = engine.delete_files_older_than(now_millis() - 60_000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(engine.get_cached_file("https://cdn/old.png").await.unwrap().is_none());
        assert!(engine.get_cached_file("https://cdn/logo.png").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_database_size_covers_all_partitions() {
        let engine = StorageEngine::in_memory();
        engine.set_preference("a", json!(1)).await.unwrap();

        let sizes = engine.database_size().await.unwrap();
        assert_eq!(sizes.len(), Partition::ALL.len());

        let prefs = sizes.iter().find(|s| s.partition == Partition::UserPreferences).unwrap();
        assert_eq!(prefs.count, 1);
        assert!(prefs.size_bytes > 0);
        assert_eq!(engine.total_size_bytes().await.unwrap(), prefs.size_bytes);
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let source = StorageEngine::in_memory();
        source.set_preference("lang", json!("en")).await.unwrap();
        source.cache_file("https://cdn/a.css", b"body{}".to_vec()).await.unwrap();

        let export = source.export_all().await.unwrap();
        assert_eq!(export.record_count(), 2);

        // Survives a JSON round trip
        let text = serde_json::to_string(&export).unwrap();
        let parsed: DatabaseExport = serde_json::from_str(&text).unwrap();

        let target = StorageEngine::in_memory();
        target.set_preference("stale", json!(true)).await.unwrap();
        let imported = target.import_all(&parsed).await.unwrap();

        assert_eq!(imported, 2);
        assert_eq!(target.get_preference("lang").await.unwrap(), Some(json!("en")));
        assert_eq!(target.get_preference("stale").await.unwrap(), None);
        let file = target.get_cached_file("https://cdn/a.css").await.unwrap().unwrap();
        assert_eq!(file.blob, b"body{}".to_vec());
    }
}
