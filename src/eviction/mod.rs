// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Eviction policy for the size-budgeted cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  priority_fifo.rs - Victim selection                         │
//! │  └─ EvictionCandidate: id + size + priority + created time   │
//! │  └─ PriorityFifoPolicy: lowest band first, oldest first      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cache manager builds candidates from a snapshot of the `cache`
//! partition taken at the start of a cleanup pass and deletes the returned
//! victims in order. Last access time is not tracked, so this is a
//! priority-weighted FIFO rather than an LRU.

pub mod priority_fifo;

pub use priority_fifo::{EvictionCandidate, EvictionPlan, PriorityFifoPolicy};
