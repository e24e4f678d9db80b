//! Group domain entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::phase::PhaseCurrents;

/// A set of charge points sharing one upstream current budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    /// Static capacity per phase (amps)
    pub max: PhaseCurrents,
    /// Sum of member `current_assigned`
    #[serde(default)]
    pub assigned: PhaseCurrents,
    /// Sum of member measured currents
    #[serde(default)]
    pub current: PhaseCurrents,
    /// Current claimed this tick by members outside the fair-share pool
    #[serde(default)]
    pub offered_3phase: PhaseCurrents,
    /// A ramp-down push for a member is outstanding
    #[serde(default)]
    pub action_pending: bool,
    /// Member whose push will clear `action_pending`
    #[serde(default)]
    pub pending_owner: Option<String>,
    /// Ticks `action_pending` has been held
    #[serde(default)]
    pub pending_ticks: u32,
    /// Engine must not act on this group
    #[serde(default)]
    pub locked_out: bool,
    /// Stuck-pending alarm is raised
    #[serde(default)]
    pub alarm: bool,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(id: impl Into<String>, max: PhaseCurrents) -> Self {
        Self {
            id: id.into(),
            max,
            assigned: PhaseCurrents::ZERO,
            current: PhaseCurrents::ZERO,
            offered_3phase: PhaseCurrents::ZERO,
            action_pending: false,
            pending_owner: None,
            pending_ticks: 0,
            locked_out: false,
            alarm: false,
            created_at: Utc::now(),
        }
    }

    /// Claim the one-shot ramp-down slot. Returns false when already held.
    pub fn try_set_pending(&mut self, owner: &str) -> bool {
        if self.action_pending {
            return false;
        }
        self.action_pending = true;
        self.pending_owner = Some(owner.to_string());
        self.pending_ticks = 0;
        true
    }

    /// Release the slot if `charge_point_id` holds it.
    pub fn resolve_pending(&mut self, charge_point_id: &str) -> bool {
        if self.action_pending && self.pending_owner.as_deref() == Some(charge_point_id) {
            self.clear_pending();
            return true;
        }
        false
    }

    pub fn clear_pending(&mut self) {
        self.action_pending = false;
        self.pending_owner = None;
        self.pending_ticks = 0;
        self.alarm = false;
    }

    /// Remaining budget on the tightest phase after `claimed`, never negative.
    pub fn leftover(&self, claimed: PhaseCurrents) -> u32 {
        self.max.saturating_sub(claimed).min_phase()
    }

    pub fn reset_aggregates(&mut self) {
        self.assigned = PhaseCurrents::ZERO;
        self.current = PhaseCurrents::ZERO;
        self.offered_3phase = PhaseCurrents::ZERO;
    }
}
