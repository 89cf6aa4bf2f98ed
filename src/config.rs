// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the offline store.
//!
//! # Example
//!
//! ```
//! use offline_sync::OfflineSyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = OfflineSyncConfig::default();
//! assert_eq!(config.max_total_size_bytes, 50 * 1024 * 1024); // 50 MB
//! assert_eq!(config.cleanup_interval_secs, 300);
//!
//! // Tuned config
//! let config = OfflineSyncConfig {
//!     sql_url: Some("sqlite://offline.db?mode=rwc".into()),
//!     compression_enabled: false,
//!     max_total_size_bytes: 10 * 1024 * 1024,
//!     ..Default::default()
//! };
//! assert!(!config.compression_enabled);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the offline store.
///
/// All fields have defaults. Without `sql_url` the store lives in memory.
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineSyncConfig {
    /// SQLite connection string (e.g., "sqlite://offline.db?mode=rwc")
    #[serde(default)]
    pub sql_url: Option<String>,

    /// Compress cached payloads before storing them
    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,

    /// Zstd level used when compression is enabled
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// TTL applied when a strategy matched but neither it nor the caller
    /// supplied one (default: 5 minutes)
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Budget across all partitions before cleanup starts evicting (default: 50 MB)
    #[serde(default = "default_max_total_size_bytes")]
    pub max_total_size_bytes: u64,

    /// Periodic cleanup interval (default: 5 minutes)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Cached files older than this are dropped on cleanup (default: 7 days)
    #[serde(default = "default_file_cache_max_age_secs")]
    pub file_cache_max_age_secs: u64,

    /// Tag used when registering platform background sync
    #[serde(default = "default_background_sync_tag")]
    pub background_sync_tag: String,
}

fn default_compression_enabled() -> bool { true }
fn default_compression_level() -> i32 { 3 }
fn default_ttl_ms() -> u64 { 5 * 60 * 1000 } // 5 minutes
fn default_max_total_size_bytes() -> u64 { 50 * 1024 * 1024 } // 50 MB
fn default_cleanup_interval_secs() -> u64 { 300 }
fn default_file_cache_max_age_secs() -> u64 { 7 * 24 * 60 * 60 } // 7 days
fn default_background_sync_tag() -> String { "offline-mutations".to_string() }

impl Default for OfflineSyncConfig {
    fn default() -> Self {
        Self {
            sql_url: None,
            compression_enabled: default_compression_enabled(),
            compression_level: default_compression_level(),
            default_ttl_ms: default_ttl_ms(),
            max_total_size_bytes: default_max_total_size_bytes(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            file_cache_max_age_secs: default_file_cache_max_age_secs(),
            background_sync_tag: default_background_sync_tag(),
        }
    }
}

impl OfflineSyncConfig {
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    #[must_use]
    pub fn file_cache_max_age(&self) -> Duration {
        Duration::from_secs(self.file_cache_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: OfflineSyncConfig = serde_json::from_str("{}").unwrap();
        assert!(config.sql_url.is_none());
        assert!(config.compression_enabled);
        assert_eq!(config.default_ttl(), Duration::from_secs(300));
        assert_eq!(config.file_cache_max_age(), Duration::from_secs(604_800));
        assert_eq!(config.background_sync_tag, "offline-mutations");
    }

    #[test]
    fn test_deserialize_overrides() {
        let config: OfflineSyncConfig = serde_json::from_str(
            r#"{"sql_url": "sqlite::memory:", "cleanup_interval_secs": 60, "compression_enabled": false}"#,
        )
        .unwrap();
        assert_eq!(config.sql_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
        assert!(!config.compression_enabled);
        assert_eq!(config.max_total_size_bytes, 50 * 1024 * 1024);
    }
}
