// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::eviction::EvictionCandidate;
use crate::priority::Priority;

/// A cached payload as stored in the `cache` partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheItem {
    pub id: String,
    /// JSON text, or base64 of the compressed JSON when `metadata.compressed`.
    pub data: String,
    /// Creation time (epoch millis)
    pub timestamp: i64,
    /// Absolute expiry (epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    pub metadata: CacheItemMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItemMetadata {
    pub strategy_name: String,
    pub priority: Priority,
    /// Serialized JSON length before compression.
    pub size_bytes: u64,
    pub compressed: bool,
}

impl CacheItem {
    /// Live iff no expiry, or `now <= expiry`.
    #[must_use]
    pub fn is_live(&self, now: i64) -> bool {
        self.expiry.map_or(true, |expiry| now <= expiry)
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        !self.is_live(now)
    }

    pub(crate) fn eviction_candidate(&self, record_bytes: u64) -> EvictionCandidate {
        EvictionCandidate {
            id: self.id.clone(),
            size_bytes: record_bytes,
            priority: self.metadata.priority,
            timestamp: self.timestamp,
        }
    }
}

/// Per-call overrides for [`CacheManager::set`](super::CacheManager::set).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub priority: Option<Priority>,
}

impl SetOptions {
    #[must_use]
    pub fn ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl), priority: None }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Cache effectiveness counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetrics {
    pub total_requests: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Payload bytes written through `set` since the last reset/cleanup.
    pub cache_size_bytes: u64,
    pub last_cleanup_at: Option<i64>,
}

impl CacheMetrics {
    pub(crate) fn record_hit(&mut self) {
        self.total_requests += 1;
        self.total_hits += 1;
        self.recompute_rates();
    }

    pub(crate) fn record_miss(&mut self) {
        self.total_requests += 1;
        self.total_misses += 1;
        self.recompute_rates();
    }

    // miss_rate is derived so the two always sum to exactly 1.0
    fn recompute_rates(&mut self) {
        if self.total_requests == 0 {
            self.hit_rate = 0.0;
            self.miss_rate = 0.0;
            return;
        }
        self.hit_rate = self.total_hits as f64 / self.total_requests as f64;
        self.miss_rate = 1.0 - self.hit_rate;
    }
}

/// Outcome of one [`CacheManager::perform_cleanup`](super::CacheManager::perform_cleanup) pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_removed: usize,
    pub files_removed: usize,
    pub evicted: usize,
    pub bytes_freed: u64,
    /// Store size measured before eviction.
    pub total_size_bytes: u64,
    /// Eviction ran out of candidates before getting under budget.
    pub still_over_budget: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(expiry: Option<i64>) -> CacheItem {
        CacheItem {
            id: "api/vendors".to_string(),
            data: "[]".to_string(),
            timestamp: 1_000,
            expiry,
            metadata: CacheItemMetadata {
                strategy_name: "api".to_string(),
                priority: Priority::Medium,
                size_bytes: 2,
                compressed: false,
            },
        }
    }

    #[test]
    fn test_liveness_boundary() {
        let item = item(Some(2_000));
        assert!(item.is_live(2_000));
        assert!(item.is_expired(2_001));
        assert!(self::item(None).is_live(i64::MAX));
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let value = serde_json::to_value(item(Some(5))).unwrap();
        assert_eq!(value["metadata"]["strategyName"], "api");
        assert_eq!(value["metadata"]["sizeBytes"], 2);
        assert_eq!(value["expiry"], 5);

        let no_expiry = serde_json::to_value(item(None)).unwrap();
        assert!(no_expiry.get("expiry").is_none());
    }

    #[test]
    fn test_rates_sum_to_one() {
        let mut metrics = CacheMetrics::default();
        assert_eq!(metrics.hit_rate + metrics.miss_rate, 0.0);

        metrics.record_hit();
        metrics.record_miss();
        metrics.record_miss();
        assert_eq!(metrics.total_requests, 3);
        assert!((metrics.hit_rate - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(metrics.hit_rate + metrics.miss_rate, 1.0);
    }
}
