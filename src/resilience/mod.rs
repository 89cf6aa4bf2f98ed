// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for backend connections and queries.
//!
//! Queued mutations are not retried here: their retries happen on the next
//! replay pass and are counted on the mutation itself.

pub mod retry;
