//! Group fair share and aggregation.

use crate::domain::{Group, PhaseCurrents};

/// Result of one group's fair-share pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Current held by members outside the pool
    pub claimed: PhaseCurrents,
    /// Budget left on the tightest phase, never negative
    pub leftover: u32,
    pub pool_size: usize,
    /// Per-charger share, `None` with an empty pool
    pub share: Option<u32>,
}

/// `min(leftover / n, cap)`, or `None` when nobody wants full power.
pub fn fair_share(leftover: u32, pool_size: usize, cap: u32) -> Option<u32> {
    if pool_size == 0 {
        return None;
    }
    let n = u32::try_from(pool_size).unwrap_or(u32::MAX);
    Some((leftover / n).min(cap))
}

/// Split what the fixed-target members leave of `group`'s budget.
pub fn allocate(group: &Group, claimed: PhaseCurrents, pool_size: usize, cap: u32) -> Allocation {
    let leftover = group.leftover(claimed);
    Allocation {
        claimed,
        leftover,
        pool_size,
        share: fair_share(leftover, pool_size, cap),
    }
}

/// Per-group sums over members, plus fleet totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Totals {
    pub assigned: PhaseCurrents,
    pub current: PhaseCurrents,
    pub targeted: PhaseCurrents,
}

impl Totals {
    pub fn add(&mut self, assigned: PhaseCurrents, current: PhaseCurrents, targeted: PhaseCurrents) {
        self.assigned = self.assigned.saturating_add(assigned);
        self.current = self.current.saturating_add(current);
        self.targeted = self.targeted.saturating_add(targeted);
    }
}
