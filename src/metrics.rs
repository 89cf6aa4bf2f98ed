// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for offline-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `offline_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `component`: cache, queue, sync, storage
//! - `operation`: get, set, cleanup, replay, ...
//! - `outcome`: hit, miss, applied, failed, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a cache lookup
pub fn record_cache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("offline_sync_cache_lookups_total", "outcome" => outcome).increment(1);
}

/// Record a cache write attempt (`stored` or `rejected` by policy)
pub fn record_cache_write(strategy: &str, outcome: &str) {
    counter!(
        "offline_sync_cache_writes_total",
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set the tracked cache payload size
pub fn set_cache_bytes(bytes: u64) {
    gauge!("offline_sync_cache_bytes").set(bytes as f64);
}

/// Set current hit rate (0.0 - 1.0)
pub fn set_cache_hit_rate(rate: f64) {
    gauge!("offline_sync_cache_hit_rate").set(rate);
}

/// Record entries removed by a cleanup pass
pub fn record_cleanup(expired: usize, files: usize, evicted: usize) {
    counter!("offline_sync_cache_expired_total").increment(expired as u64);
    counter!("offline_sync_file_cache_expired_total").increment(files as u64);
    counter!("offline_sync_evictions_total").increment(evicted as u64);
}

/// Record bytes freed by eviction
pub fn record_evicted_bytes(bytes: u64) {
    counter!("offline_sync_evicted_bytes_total").increment(bytes);
}

/// Set total size of the store across partitions
pub fn set_storage_bytes(bytes: u64) {
    gauge!("offline_sync_storage_bytes").set(bytes as f64);
}

/// Record a mutation entering the queue
pub fn record_mutation_queued(method: &str) {
    counter!("offline_sync_mutations_queued_total", "method" => method.to_string()).increment(1);
}

/// Record the outcome of replaying one mutation
pub fn record_mutation_replay(outcome: &str) {
    counter!("offline_sync_mutations_replayed_total", "outcome" => outcome.to_string()).increment(1);
}

/// Set queue depth
pub fn set_queue_depth(count: usize) {
    gauge!("offline_sync_queue_depth").set(count as f64);
}

/// Set sync state (0 = Offline, 1 = Replaying, 2 = Idle)
pub fn set_sync_state(state: u8) {
    gauge!("offline_sync_state").set(state as f64);
}

/// Record a storage error by component
pub fn record_error(component: &str, operation: &str) {
    counter!(
        "offline_sync_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "offline_sync_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.component, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_api_without_recorder_is_noop() {
        record_cache_lookup(true);
        record_cache_write("api", "stored");
        set_cache_bytes(1024);
        record_cleanup(1, 0, 2);
        record_mutation_replay("applied");
        set_sync_state(2);
    }

    #[test]
    fn test_lookup_counters_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_cache_lookup(true);
            record_cache_lookup(true);
            record_cache_lookup(false);
            set_queue_depth(3);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let hits = snapshot.iter().find(|(key, _, _, _)| {
            key.key().name() == "offline_sync_cache_lookups_total"
                && key.key().labels().any(|l| l.value() == "hit")
        });
        assert!(matches!(hits, Some((_, _, _, DebugValue::Counter(2)))));

        let depth = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "offline_sync_queue_depth");
        assert!(matches!(depth, Some((_, _, _, DebugValue::Gauge(v))) if v.into_inner() == 3.0));
    }

    #[test]
    fn test_latency_timer() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let _timer = LatencyTimer::new("cache", "get");
            std::thread::sleep(Duration::from_micros(10));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert!(snapshot
            .iter()
            .any(|(key, _, _, value)| key.key().name() == "offline_sync_operation_seconds"
                && matches!(value, DebugValue::Histogram(samples) if samples.len() == 1)));
    }
}
