// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::priority::Priority;

/// Cache entry metadata needed to pick eviction victims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: String,
    pub size_bytes: u64,
    pub priority: Priority,
    /// Creation time (epoch millis)
    pub timestamp: i64,
}

/// Victims chosen for one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Ids in deletion order.
    pub victims: Vec<String>,
    /// Bytes freed if every victim is deleted.
    pub planned_bytes: u64,
    /// False when candidates ran out before reaching the target.
    pub target_met: bool,
}

/// Lowest priority band first; within a band, oldest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityFifoPolicy;

impl PriorityFifoPolicy {
    /// Sort candidates into eviction order (ties broken by id).
    pub fn order(&self, candidates: &mut [EvictionCandidate]) {
        candidates.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(a.timestamp.cmp(&b.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    /// Pick victims until at least `overage` bytes are planned for removal.
    ///
    /// Best effort: if every candidate is taken and the total is still short
    /// of `overage`, the plan says so and the cache stays over budget.
    pub fn select_victims(&self, mut candidates: Vec<EvictionCandidate>, overage: u64) -> EvictionPlan {
        if overage == 0 {
            return EvictionPlan { target_met: true, ..Default::default() };
        }

        self.order(&mut candidates);

        let mut plan = EvictionPlan::default();
        for candidate in candidates {
            if plan.planned_bytes >= overage {
                break;
            }
            plan.planned_bytes += candidate.size_bytes;
            plan.victims.push(candidate.id);
        }
        plan.target_met = plan.planned_bytes >= overage;
        plan
    }
}
