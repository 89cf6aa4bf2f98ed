// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Policy-driven cache over the `cache` partition.
//!
//! # Write path
//!
//! ```text
//! set(key, data) ─► resolve strategy ─► serialize ─► size cap ─► compress ─► put
//!                    (first match)                   (Ok(false)   (optional,
//!                                                     if over)     base64)
//! ```
//!
//! Reads never fail: absent, expired, corrupt or undecodable entries are
//! counted as misses. Expired entries are only removed by
//! [`CacheManager::perform_cleanup`], which also enforces the store-wide
//! size budget through [`PriorityFifoPolicy`].

pub mod hooks;
pub mod item;
pub mod strategy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use hooks::{HotCache, QueryCacheHook};
pub use item::{CacheItem, CacheItemMetadata, CacheMetrics, CleanupReport, SetOptions};
pub use strategy::{CacheStrategy, StrategyList};

use crate::compression::{compress_text, decompress_text, CompressionCodec, ZstdCodec};
use crate::config::OfflineSyncConfig;
use crate::eviction::PriorityFifoPolicy;
use crate::metrics::LatencyTimer;
use crate::now_millis;
use crate::priority::Priority;
use crate::storage::{IndexRange, Partition, StorageEngine, StorageError};

/// Strategy name recorded for entries cached with an explicit TTL only.
const CUSTOM_STRATEGY: &str = "custom";

pub struct CacheManager {
    storage: Arc<StorageEngine>,
    strategies: StrategyList,
    codec: Option<Arc<dyn CompressionCodec>>,
    policy: PriorityFifoPolicy,
    metrics: Mutex<CacheMetrics>,
    query_cache: Option<Arc<dyn QueryCacheHook>>,
    hot_cache: Option<Arc<dyn HotCache>>,
    config: OfflineSyncConfig,
}

impl CacheManager {
    /// Cache with the default strategies. Compression follows
    /// `config.compression_enabled` (zstd at `config.compression_level`).
    pub fn new(storage: Arc<StorageEngine>, config: OfflineSyncConfig) -> Self {
        let codec: Option<Arc<dyn CompressionCodec>> = if config.compression_enabled {
            Some(Arc::new(ZstdCodec::with_level(config.compression_level)))
        } else {
            None
        };
        Self {
            storage,
            strategies: StrategyList::default(),
            codec,
            policy: PriorityFifoPolicy,
            metrics: Mutex::new(CacheMetrics::default()),
            query_cache: None,
            hot_cache: None,
            config,
        }
    }

    #[must_use]
    pub fn with_strategies(mut self, strategies: StrategyList) -> Self {
        self.strategies = strategies;
        self
    }

    /// Replace the codec; `None` stores raw JSON text.
    #[must_use]
    pub fn with_codec(mut self, codec: Option<Arc<dyn CompressionCodec>>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_query_cache(mut self, hook: Arc<dyn QueryCacheHook>) -> Self {
        self.query_cache = Some(hook);
        self
    }

    #[must_use]
    pub fn with_hot_cache(mut self, hot: Arc<dyn HotCache>) -> Self {
        self.hot_cache = Some(hot);
        self
    }

    pub fn strategies(&self) -> &StrategyList {
        &self.strategies
    }

    /// Cache `data` under `key`.
    ///
    /// Returns `Ok(false)` when policy refuses the entry: no matching
    /// strategy and no explicit TTL, a zero TTL, or a payload over the
    /// strategy's size cap. Serialization and storage failures are errors.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        options: SetOptions,
    ) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("cache", "set");
        let strategy = self.strategies.resolve(key);

        let ttl = match (options.ttl, strategy) {
            (Some(ttl), _) => ttl,
            (None, Some(s)) => s.ttl.unwrap_or_else(|| self.config.default_ttl()),
            (None, None) => {
                debug!(key = %key, "No cache strategy matched and no TTL given");
                crate::metrics::record_cache_write(CUSTOM_STRATEGY, "rejected");
                return Ok(false);
            }
        };
        let strategy_name = strategy.map_or(CUSTOM_STRATEGY, |s| s.name.as_str());

        // Expiry is kept in whole milliseconds and must land after the timestamp
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        if ttl_ms == 0 {
            debug!(key = %key, strategy = strategy_name, ?ttl, "TTL under 1 ms, not caching");
            crate::metrics::record_cache_write(strategy_name, "rejected");
            return Ok(false);
        }

        let priority = options
            .priority
            .or_else(|| strategy.map(|s| s.priority))
            .unwrap_or(Priority::Medium);

        let json = serde_json::to_string(data)?;
        let size = json.len();
        if let Some(s) = strategy {
            if !s.accepts_size(size) {
                warn!(
                    key = %key,
                    strategy = strategy_name,
                    size,
                    max = ?s.max_size_bytes,
                    "Payload exceeds strategy size cap, not caching"
                );
                crate::metrics::record_cache_write(strategy_name, "rejected");
                return Ok(false);
            }
        }

        let (stored, compressed) = match &self.codec {
            Some(codec) => {
                let text = compress_text(codec.as_ref(), &json)
                    .map_err(|e| StorageError::Serialization(format!("{}: {}", codec.name(), e)))?;
                (text, true)
            }
            None => (json, false),
        };

        let now = now_millis();
        let item = CacheItem {
            id: key.to_string(),
            data: stored,
            timestamp: now,
            expiry: Some(now.saturating_add(ttl_ms)),
            metadata: CacheItemMetadata {
                strategy_name: strategy_name.to_string(),
                priority,
                size_bytes: size as u64,
                compressed,
            },
        };
        if let Err(e) = self.storage.put(Partition::Cache, &item).await {
            crate::metrics::record_error("cache", "set");
            return Err(e);
        }

        let cache_bytes = {
            let mut metrics = self.metrics.lock();
            metrics.cache_size_bytes += size as u64;
            metrics.cache_size_bytes
        };
        crate::metrics::set_cache_bytes(cache_bytes);
        crate::metrics::record_cache_write(strategy_name, "stored");
        debug!(
            key = %key,
            strategy = strategy_name,
            size,
            codec = self.codec.as_ref().map_or("none", |c| c.name()),
            "Cached"
        );
        Ok(true)
    }

    /// Look up `key`. Every failure is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let _timer = LatencyTimer::new("cache", "get");
        let result = self.lookup(key).await;
        self.record_lookup(result.is_some());
        result
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let item = match self.storage.get::<CacheItem>(Partition::Cache, key).await {
            Ok(Some(item)) => item,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                crate::metrics::record_error("cache", "get");
                return None;
            }
        };

        if item.is_expired(now_millis()) {
            debug!(key = %key, expiry = ?item.expiry, "Cache entry expired");
            return None;
        }

        let json = if item.metadata.compressed {
            let Some(codec) = &self.codec else {
                warn!(key = %key, "Entry is compressed but no codec is configured");
                return None;
            };
            match decompress_text(codec.as_ref(), &item.data) {
                Ok(json) => json,
                Err(e) => {
                    warn!(key = %key, codec = codec.name(), error = %e, "Cache entry failed to decompress");
                    return None;
                }
            }
        } else {
            item.data
        };

        match serde_json::from_str(&json) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache entry failed to parse");
                None
            }
        }
    }

    fn record_lookup(&self, hit: bool) {
        let hit_rate = {
            let mut metrics = self.metrics.lock();
            if hit {
                metrics.record_hit();
            } else {
                metrics.record_miss();
            }
            metrics.hit_rate
        };
        crate::metrics::record_cache_lookup(hit);
        crate::metrics::set_cache_hit_rate(hit_rate);
    }

    /// True if a live entry exists for `key`. Does not touch hit/miss counters.
    pub async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        let item: Option<CacheItem> = self.storage.get(Partition::Cache, key).await?;
        Ok(item.is_some_and(|item| item.is_live(now_millis())))
    }

    /// Remove entries whose key contains `pattern`; `None` removes everything.
    /// The query cache hook is told to drop the same keys.
    pub async fn invalidate(&self, pattern: Option<&str>) -> Result<usize, StorageError> {
        let removed = match pattern {
            None => {
                let count = self.storage.backend().partition_size(Partition::Cache).await?.count;
                self.clear().await?;
                count as usize
            }
            Some(pattern) => {
                let mut removed = 0;
                let mut freed = 0u64;
                for record in self.storage.backend().get_all(Partition::Cache).await? {
                    let key = Partition::Cache.key_of(&record)?;
                    if !key.contains(pattern) {
                        continue;
                    }
                    freed += payload_size(&record);
                    self.storage.delete(Partition::Cache, &key).await?;
                    removed += 1;
                }
                self.release_bytes(freed);
                removed
            }
        };

        if let Some(hook) = &self.query_cache {
            match pattern {
                Some(pattern) => hook.invalidate_matching(&|key: &str| key.contains(pattern)),
                None => hook.invalidate_matching(&|_: &str| true),
            }
        }

        info!(pattern = ?pattern, removed, "Cache invalidated");
        Ok(removed)
    }

    /// Remove every cache entry.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.clear(Partition::Cache).await?;
        self.metrics.lock().cache_size_bytes = 0;
        crate::metrics::set_cache_bytes(0);
        debug!("Cache cleared");
        Ok(())
    }

    /// Expire, age out cached files, then evict down to the size budget.
    #[tracing::instrument(skip(self))]
    pub async fn perform_cleanup(&self) -> Result<CleanupReport, StorageError> {
        let _timer = LatencyTimer::new("cache", "cleanup");
        let now = now_millis();
        let mut report = CleanupReport::default();
        let snapshot = self.cache_snapshot().await?;

        report.expired_removed = self.remove_expired(now).await?;

        let max_age_ms = i64::try_from(self.config.file_cache_max_age().as_millis()).unwrap_or(i64::MAX);
        report.files_removed = self
            .storage
            .delete_files_older_than(now.saturating_sub(max_age_ms))
            .await?;

        report.total_size_bytes = self.storage.total_size_bytes().await?;
        crate::metrics::set_storage_bytes(report.total_size_bytes);

        if report.total_size_bytes > self.config.max_total_size_bytes {
            let overage = report.total_size_bytes - self.config.max_total_size_bytes;
            let (evicted, freed) = self.evict(&snapshot, now, overage).await?;
            report.evicted = evicted;
            report.bytes_freed = freed;
            report.still_over_budget = freed < overage;
            if report.still_over_budget {
                warn!(overage, freed, "Eviction could not get the store under budget");
            }
        }

        let remaining = self.remaining_payload_bytes().await?;
        {
            let mut metrics = self.metrics.lock();
            metrics.last_cleanup_at = Some(now);
            metrics.cache_size_bytes = remaining;
        }
        crate::metrics::set_cache_bytes(remaining);
        crate::metrics::record_cleanup(report.expired_removed, report.files_removed, report.evicted);

        info!(
            expired = report.expired_removed,
            files = report.files_removed,
            evicted = report.evicted,
            total_bytes = report.total_size_bytes,
            "Cache cleanup complete"
        );
        Ok(report)
    }

    async fn remove_expired(&self, now: i64) -> Result<usize, StorageError> {
        // Reads still serve an entry at exactly its expiry; the sweep takes it
        let candidates = self
            .storage
            .get_by_index_range::<CacheItem>(Partition::Cache, "expiry", &IndexRange::at_most(now))
            .await?;

        let mut removed = 0;
        for candidate in candidates {
            // Rewritten since the snapshot: leave it
            let current: Option<CacheItem> = self.storage.get(Partition::Cache, &candidate.id).await?;
            let still_expired = current
                .as_ref()
                .is_some_and(|item| item.expiry.is_some_and(|expiry| expiry <= now));
            if !still_expired {
                continue;
            }
            self.storage.delete(Partition::Cache, &candidate.id).await?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "Expired cache entries removed");
        }
        Ok(removed)
    }

    /// Cache records as they stood when the cleanup pass began, with their
    /// stored size.
    async fn cache_snapshot(&self) -> Result<Vec<(CacheItem, u64)>, StorageError> {
        let records = self.storage.backend().get_all(Partition::Cache).await?;
        let mut snapshot = Vec::with_capacity(records.len());
        for record in records {
            let record_bytes = serde_json::to_vec(&record).map(|b| b.len() as u64)?;
            match serde_json::from_value::<CacheItem>(record) {
                Ok(item) => snapshot.push((item, record_bytes)),
                Err(e) => warn!(error = %e, "Skipping undecodable cache record during cleanup"),
            }
        }
        Ok(snapshot)
    }

    /// Delete snapshot entries in eviction order until `overage` bytes are
    /// freed. Returns (entries evicted, bytes freed).
    async fn evict(&self, snapshot: &[(CacheItem, u64)], now: i64, overage: u64) -> Result<(usize, u64), StorageError> {
        let mut sizes = HashMap::with_capacity(snapshot.len());
        let mut candidates = Vec::with_capacity(snapshot.len());
        for (item, record_bytes) in snapshot {
            // Handled by the expiry sweep
            if item.expiry.is_some_and(|expiry| expiry <= now) {
                continue;
            }
            sizes.insert(item.id.as_str(), (*record_bytes, item.timestamp));
            candidates.push(item.eviction_candidate(*record_bytes));
        }

        let plan = self.policy.select_victims(candidates, overage);
        let mut evicted = 0;
        let mut freed = 0u64;
        for id in plan.victims {
            if freed >= overage {
                break;
            }
            let Some(&(bytes, snapshot_ts)) = sizes.get(id.as_str()) else { continue };
            let current: Option<CacheItem> = self.storage.get(Partition::Cache, &id).await?;
            match current {
                Some(item) if item.timestamp == snapshot_ts => {
                    self.storage.delete(Partition::Cache, &id).await?;
                    evicted += 1;
                    freed += bytes;
                }
                _ => debug!(key = %id, "Entry changed since snapshot, not evicting"),
            }
        }

        crate::metrics::record_evicted_bytes(freed);
        info!(evicted, freed, overage, "Cache eviction pass");
        Ok((evicted, freed))
    }

    async fn remaining_payload_bytes(&self) -> Result<u64, StorageError> {
        let records = self.storage.backend().get_all(Partition::Cache).await?;
        Ok(records.iter().map(payload_size).sum())
    }

    fn release_bytes(&self, bytes: u64) {
        let remaining = {
            let mut metrics = self.metrics.lock();
            metrics.cache_size_bytes = metrics.cache_size_bytes.saturating_sub(bytes);
            metrics.cache_size_bytes
        };
        crate::metrics::set_cache_bytes(remaining);
    }

    /// Refresh `keys` from the hot cache where it holds a newer copy.
    /// Returns how many were re-cached.
    pub async fn warm_cache<I>(&self, keys: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let Some(hot) = &self.hot_cache else {
            debug!("No hot cache configured, nothing to warm");
            return 0;
        };

        let mut warmed = 0;
        for key in keys {
            let key = key.as_ref();
            let cached_at = match self.storage.get::<CacheItem>(Partition::Cache, key).await {
                Ok(item) => item.map(|i| i.timestamp),
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not read cached copy while warming");
                    None
                }
            };
            let Some(fresh) = hot.fresher_copy(key, cached_at).await else { continue };
            match self.set(key, &fresh, SetOptions::default()).await {
                Ok(true) => warmed += 1,
                Ok(false) => debug!(key = %key, "Warm copy refused by cache policy"),
                Err(e) => warn!(key = %key, error = %e, "Failed to warm cache entry"),
            }
        }
        info!(warmed, "Cache warmed");
        warmed
    }

    /// Fetch and cache `key` unless a live entry already exists.
    ///
    /// Returns `Ok(true)` when a value was fetched and stored. Fetcher
    /// errors are logged and yield `Ok(false)`.
    pub async fn prefetch_data<F, Fut, T, E>(&self, key: &str, fetcher: F) -> Result<bool, StorageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: std::fmt::Display,
    {
        if self.contains(key).await? {
            debug!(key = %key, "Already cached, skipping prefetch");
            return Ok(false);
        }
        match fetcher().await {
            Ok(data) => self.set(key, &data, SetOptions::default()).await,
            Err(e) => {
                warn!(key = %key, error = %e, "Prefetch fetcher failed");
                Ok(false)
            }
        }
    }

    /// Snapshot of the hit/miss counters.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().clone()
    }

    /// Run [`perform_cleanup`](Self::perform_cleanup) every `interval` until
    /// `shutdown` flips to `true` (or its sender is dropped).
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = cache.perform_cleanup().await {
                            warn!(error = %e, "Periodic cache cleanup failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Cache cleanup task stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Payload size recorded on a raw cache record (0 if missing).
fn payload_size(record: &Value) -> u64 {
    record
        .get("metadata")
        .and_then(|m| m.get("sizeBytes"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
