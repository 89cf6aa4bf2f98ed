// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The transport used to replay queued mutations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::queue::OfflineMutation;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network unreachable")]
    Offline,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Server acknowledgement of a replayed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Applied now. `version` is the entity version the server reports, if any.
    Applied { version: Option<i64> },
    /// The server had already applied this write.
    AlreadyApplied,
}

/// The HTTP-shaped part of a mutation sent on replay.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl From<&OfflineMutation> for MutationRequest {
    fn from(mutation: &OfflineMutation) -> Self {
        Self {
            url: mutation.url.clone(),
            method: mutation.method.clone(),
            headers: mutation.headers.clone(),
            body: mutation.body.clone(),
        }
    }
}

#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Send one write. Timeouts and cancellation are the client's concern.
    async fn send(&self, request: &MutationRequest) -> Result<ReplayOutcome, NetworkError>;
}
