// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic offline-sync usage example.
//!
//! Demonstrates:
//! 1. Opening a SQLite-backed store
//! 2. Caching API responses and reading them back
//! 3. Queuing writes while offline
//! 4. Replaying them when connectivity returns
//! 5. Cleanup and metrics
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=offline_sync=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use offline_sync::{
    CacheManager, ManualConnectivity, MutationDescriptor, MutationQueue, MutationRequest, NetworkClient,
    NetworkError, OfflineSyncConfig, Priority, ReplayOutcome, SetOptions, StorageEngine, SyncCoordinator, SyncState,
};

/// Pretends to be the API server: accepts everything, numbers versions.
struct DemoServer {
    next_version: parking_lot::Mutex<i64>,
}

#[async_trait]
impl NetworkClient for DemoServer {
    async fn send(&self, request: &MutationRequest) -> Result<ReplayOutcome, NetworkError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut version = self.next_version.lock();
        *version += 1;
        println!("   └─ server ← {} {} (v{})", request.method, request.url, *version);
        Ok(ReplayOutcome::Applied { version: Some(*version) })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    if recorder.install().is_err() {
        eprintln!("a metrics recorder is already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_sync=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           offline-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Open the store
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let config = OfflineSyncConfig {
        sql_url: Some(format!("sqlite://{}?mode=rwc", dir.path().join("offline.db").display())),
        ..Default::default()
    };
    let url = config.sql_url.clone().unwrap_or_else(|| "sqlite::memory:".into());
    println!("📦 Opening {}", url);
    let storage = Arc::new(StorageEngine::sqlite(&url).await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Cache
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Caching responses...");
    let cache = Arc::new(CacheManager::new(storage.clone(), config.clone()));
    let entries = [
        ("api/vendors", json!([{"id": 1, "name": "Acme"}, {"id": 2, "name": "Globex"}])),
        ("app-config", json!({"theme": "dark", "features": ["offline"]})),
        ("vendor-search?q=ac", json!({"hits": [1]})),
        ("unmatched/key", json!("no strategy, no ttl")),
    ];
    for (key, data) in &entries {
        let stored = cache.set(key, data, SetOptions::default()).await?;
        println!("   └─ {} → stored={}", key, stored);
    }

    println!("\n📖 Reading back...");
    for (key, _) in &entries {
        let value: Option<Value> = cache.get(key).await;
        println!("   └─ {} → {}", key, value.map_or("MISS".to_string(), |v| v.to_string()));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Queue writes while offline
    // ─────────────────────────────────────────────────────────────────────────
    let connectivity = Arc::new(ManualConnectivity::new(false));
    let coordinator = Arc::new(SyncCoordinator::new(
        storage.clone(),
        Arc::new(MutationQueue::new(storage.clone())),
        Arc::new(DemoServer { next_version: parking_lot::Mutex::new(0) }),
        connectivity.clone(),
        &config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run(shutdown_rx).await })
    };
    let cleanup = cache.spawn_cleanup(config.cleanup_interval(), shutdown_tx.subscribe());

    println!("\n📴 Offline. Queuing writes...");
    coordinator
        .queue_mutation(
            MutationDescriptor::new("PUT", "/api/vendors/1")
                .with_body(json!({"name": "Acme Ltd"}))
                .with_description("Rename vendor")
                .for_entity("vendor", "1"),
        )
        .await?;
    coordinator
        .queue_mutation(
            MutationDescriptor::new("POST", "/api/audit")
                .with_body(json!({"event": "rename"}))
                .with_priority(Priority::High),
        )
        .await?;
    println!(
        "   └─ pending: {} (state: {})",
        coordinator.queue().pending_count().await?,
        coordinator.state()
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Reconnect
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📶 Back online, replaying...");
    let mut state_rx = coordinator.state_receiver();
    connectivity.set_online(true);
    state_rx.wait_for(|s| *s == SyncState::Idle).await?;
    println!("   └─ pending: {}", coordinator.queue().pending_count().await?);
    if let Some(status) = coordinator.statuses().get("vendor", "1").await? {
        println!("   └─ vendor:1 synced at v{}", status.version);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Cleanup and metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧹 Cleanup...");
    let report = cache.perform_cleanup().await?;
    println!("   └─ {:?}", report);

    let metrics = cache.metrics();
    println!("\n📊 Cache Metrics:");
    println!("   └─ requests={} hits={} misses={}", metrics.total_requests, metrics.total_hits, metrics.total_misses);
    println!("   └─ hit rate {:.1}%", metrics.hit_rate * 100.0);

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    println!("\n🛑 Shutting down...");
    shutdown_tx.send(true)?;
    runner.await?;
    cleanup.await?;

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, value) in &counters {
        println!("   ├─ {} = {}", name, value);
    }
    for (name, value) in &gauges {
        println!("   ├─ {} = {:.2}", name, value);
    }
    for (name, count, sum) in &histograms {
        println!("   ├─ {} count={} sum={:.4}s", name, count, sum);
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
