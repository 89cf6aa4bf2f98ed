// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::priority::Priority;

/// A write captured while offline, persisted in the `mutations` partition.
///
/// Only `retry_count` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineMutation {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Creation time (epoch millis)
    pub timestamp: i64,
    pub retry_count: u32,
    pub description: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl OfflineMutation {
    /// `(entity_type, entity_id)` when both are set.
    #[must_use]
    pub fn entity(&self) -> Option<(&str, &str)> {
        match (&self.entity_type, &self.entity_id) {
            (Some(t), Some(id)) => Some((t.as_str(), id.as_str())),
            _ => None,
        }
    }
}

/// What the caller supplies to queue a write. Id, timestamp and retry
/// count are assigned by the queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationDescriptor {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub description: String,
    pub priority: Priority,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

impl MutationDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn for_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub(crate) fn into_mutation(self, id: String, timestamp: i64) -> OfflineMutation {
        OfflineMutation {
            id,
            url: self.url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            timestamp,
            retry_count: 0,
            description: self.description,
            priority: self.priority,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
        }
    }
}
