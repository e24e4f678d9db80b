//! Per-phase electrical quantities
//!
//! Currents are whole amps, power is whole watts, matching the resolution at
//! which stations report and accept limits.

use serde::{Deserialize, Serialize};

/// One leg of a three-phase supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    /// 1-based phase number as used in station configuration keys.
    pub fn number(self) -> u8 {
        match self {
            Self::L1 => 1,
            Self::L2 => 2,
            Self::L3 => 3,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.number())
    }
}

/// Current per phase in amps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseCurrents {
    pub l1: u32,
    pub l2: u32,
    pub l3: u32,
}

impl PhaseCurrents {
    pub const ZERO: PhaseCurrents = PhaseCurrents { l1: 0, l2: 0, l3: 0 };

    pub fn new(l1: u32, l2: u32, l3: u32) -> Self {
        Self { l1, l2, l3 }
    }

    /// Same value on all three phases.
    pub fn uniform(amps: u32) -> Self {
        Self::new(amps, amps, amps)
    }

    pub fn get(&self, phase: Phase) -> u32 {
        match phase {
            Phase::L1 => self.l1,
            Phase::L2 => self.l2,
            Phase::L3 => self.l3,
        }
    }

    pub fn set(&mut self, phase: Phase, amps: u32) {
        match phase {
            Phase::L1 => self.l1 = amps,
            Phase::L2 => self.l2 = amps,
            Phase::L3 => self.l3 = amps,
        }
    }

    /// Highest of the three phases.
    pub fn max_phase(&self) -> u32 {
        self.l1.max(self.l2).max(self.l3)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// All three phases strictly below `amps`.
    pub fn all_below(&self, amps: u32) -> bool {
        self.max_phase() < amps
    }

    /// Phase-wise sum, saturating.
    pub fn saturating_add(self, other: PhaseCurrents) -> Self {
        Self::new(
            self.l1.saturating_add(other.l1),
            self.l2.saturating_add(other.l2),
            self.l3.saturating_add(other.l3),
        )
    }

    /// Phase-wise difference, clamped at zero.
    pub fn saturating_sub(self, other: PhaseCurrents) -> Self {
        Self::new(
            self.l1.saturating_sub(other.l1),
            self.l2.saturating_sub(other.l2),
            self.l3.saturating_sub(other.l3),
        )
    }

    /// Phase-wise maximum.
    pub fn max(self, other: PhaseCurrents) -> Self {
        Self::new(
            self.l1.max(other.l1),
            self.l2.max(other.l2),
            self.l3.max(other.l3),
        )
    }

    /// Phase-wise minimum.
    pub fn min(self, other: PhaseCurrents) -> Self {
        Self::new(
            self.l1.min(other.l1),
            self.l2.min(other.l2),
            self.l3.min(other.l3),
        )
    }

    /// True when every phase of `self` is at most the matching phase of `limit`.
    pub fn fits_within(&self, limit: &PhaseCurrents) -> bool {
        self.l1 <= limit.l1 && self.l2 <= limit.l2 && self.l3 <= limit.l3
    }

    /// Smallest phase value.
    pub fn min_phase(&self) -> u32 {
        self.l1.min(self.l2).min(self.l3)
    }
}

impl std::iter::Sum for PhaseCurrents {
    fn sum<I: Iterator<Item = PhaseCurrents>>(iter: I) -> Self {
        iter.fold(PhaseCurrents::ZERO, PhaseCurrents::saturating_add)
    }
}

impl std::fmt::Display for PhaseCurrents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}A", self.l1, self.l2, self.l3)
    }
}

/// Active power per phase plus the station-reported total, in watts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePower {
    pub l1: u32,
    pub l2: u32,
    pub l3: u32,
    pub total: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sets_all_phases() {
        let c = PhaseCurrents::uniform(16);
        assert_eq!(c, PhaseCurrents::new(16, 16, 16));
        assert_eq!(c.max_phase(), 16);
    }

    #[test]
    fn saturating_sub_never_underflows() {
        let a = PhaseCurrents::new(10, 2, 0);
        let b = PhaseCurrents::new(4, 8, 1);
        assert_eq!(a.saturating_sub(b), PhaseCurrents::new(6, 0, 0));
    }

    #[test]
    fn sum_adds_phasewise() {
        let total: PhaseCurrents = vec![
            PhaseCurrents::new(1, 2, 3),
            PhaseCurrents::new(10, 20, 30),
        ]
        .into_iter()
        .sum();
        assert_eq!(total, PhaseCurrents::new(11, 22, 33));
    }

    #[test]
    fn fits_within_checks_every_phase() {
        let limit = PhaseCurrents::uniform(32);
        assert!(PhaseCurrents::new(32, 0, 16).fits_within(&limit));
        assert!(!PhaseCurrents::new(0, 33, 0).fits_within(&limit));
    }

    #[test]
    fn all_below_uses_highest_phase() {
        assert!(PhaseCurrents::new(5, 5, 5).all_below(6));
        assert!(!PhaseCurrents::new(5, 6, 0).all_below(6));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(PhaseCurrents::new(6, 6, 0).to_string(), "6/6/0A");
        assert_eq!(Phase::L2.to_string(), "L2");
    }
}
