// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborators the cache manager talks to but does not own.

use async_trait::async_trait;
use serde_json::Value;

/// In-memory query cache living alongside the persistent cache.
///
/// Told about invalidations so both layers drop the same keys.
pub trait QueryCacheHook: Send + Sync {
    fn invalidate_matching(&self, predicate: &dyn Fn(&str) -> bool);
}

/// Upstream source of newer data used by cache warming.
#[async_trait]
pub trait HotCache: Send + Sync {
    /// A copy of `key` newer than `cached_at` (epoch millis), if one exists.
    /// `cached_at` is `None` when nothing is cached for the key yet.
    async fn fresher_copy(&self, key: &str, cached_at: Option<i64>) -> Option<Value>;
}
