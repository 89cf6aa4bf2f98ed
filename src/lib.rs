// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Offline Sync
//!
//! Client-side persistence core for applications that must keep working
//! without a network connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Cache Manager                          │
//! │  • Strategy rules: TTL, priority, size cap per key          │
//! │  • Optional zstd/gzip compression                           │
//! │  • Hit/miss metrics, cleanup, priority FIFO eviction        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Mutation Queue  ◄──  Sync Coordinator          │
//! │  • Writes made offline      • Replays on reconnect          │
//! │  • Priority, then FIFO      • Tracks per-entity versions    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Storage Engine                          │
//! │  • Partitions: cache, mutations, syncStatus,                │
//! │    userPreferences, fileCache                               │
//! │  • Secondary indexes with range queries                     │
//! │  • SQLite (durable) or in-memory backend                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_sync::{CacheManager, MutationDescriptor, MutationQueue, OfflineSyncConfig, SetOptions, StorageEngine};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OfflineSyncConfig::default();
//!     let storage = Arc::new(StorageEngine::sqlite("sqlite://offline.db?mode=rwc").await.unwrap());
//!
//!     let cache = CacheManager::new(storage.clone(), config);
//!     cache.set("api/vendors", &json!([{"id": 1}]), SetOptions::default()).await.unwrap();
//!     let vendors: Option<serde_json::Value> = cache.get("api/vendors").await;
//!     println!("cached: {:?}", vendors);
//!
//!     let queue = MutationQueue::new(storage);
//!     let id = queue
//!         .queue_mutation(MutationDescriptor::new("POST", "/api/vendors").with_body(json!({"name": "Acme"})))
//!         .await
//!         .unwrap();
//!     println!("queued {}", id);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: Partitioned storage backends and the typed engine
//! - [`cache`]: Cache manager, strategies and cleanup
//! - [`queue`]: Durable mutation queue
//! - [`sync`]: Replay coordinator and its network/connectivity traits
//! - [`compression`]: Payload codecs
//! - [`eviction`]: Victim selection for the size budget
//! - [`resilience`]: Retry with backoff

pub mod cache;
pub mod compression;
pub mod config;
pub mod eviction;
pub mod metrics;
pub mod priority;
pub mod queue;
pub mod resilience;
pub mod storage;
pub mod sync;

pub use cache::{CacheItem, CacheManager, CacheMetrics, CacheStrategy, CleanupReport, SetOptions, StrategyList};
pub use compression::{CompressionCodec, CompressionError, GzipCodec, ZstdCodec};
pub use config::OfflineSyncConfig;
pub use metrics::LatencyTimer;
pub use priority::Priority;
pub use queue::{MutationDescriptor, MutationQueue, OfflineMutation};
pub use resilience::retry::RetryConfig;
pub use storage::{
    CachedFile, DatabaseExport, InMemoryBackend, IndexKey, IndexRange, Partition, SqliteBackend, StorageBackend,
    StorageEngine, StorageError,
};
pub use sync::{
    ConflictResolution, ConnectivitySource, ManualConnectivity, MutationRequest, NetworkClient, NetworkError,
    ReplayOutcome, ReplayReport, SyncCoordinator, SyncState, SyncStatus, SyncStatusStore,
};

/// Current time as Unix epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
