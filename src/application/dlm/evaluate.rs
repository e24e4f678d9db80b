//! Per-charger evaluation: the charging-mode state machine run once per tick.
//!
//! Each call decides the charger's target for this tick, or marks it as part
//! of its group's fair-share pool. Group state is touched only to claim the
//! one-shot ramp-down slot (`action_pending`).

use tracing::{debug, info};

use crate::config::DlmConfig;
use crate::domain::{ChargePoint, ChargingMode, ConnectorStatus, Group, PhaseCurrents};

/// Outcome of one charger's evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Not evaluated; target left as is
    Skipped,
    /// Target fixed by a rule; counts against the group budget
    Fixed,
    /// Joins the fair-share pool this tick
    WantsFullPower,
}

pub fn evaluate(cp: &mut ChargePoint, group: &mut Group, cfg: &DlmConfig) -> Evaluation {
    match cp.status {
        ConnectorStatus::Faulted | ConnectorStatus::Unknown => return Evaluation::Skipped,
        ConnectorStatus::Unavailable => return evaluate_unavailable(cp, group, cfg),
        _ => cp.counters.offline_cycles = 0,
    }

    if cp.status == ConnectorStatus::Available {
        return evaluate_unplugged(cp, group);
    }

    if let Some(amps) = cp.operator_limit {
        cp.current_targeted = PhaseCurrents::uniform(amps).min(group.max);
        return Evaluation::Fixed;
    }

    match cp.mode {
        ChargingMode::Idle => {
            cp.current_targeted = PhaseCurrents::ZERO;
            Evaluation::Fixed
        }
        ChargingMode::DoneCharging => evaluate_done_charging(cp, cfg),
        ChargingMode::Standby => evaluate_standby(cp, cfg),
        ChargingMode::ProbeRampUp => evaluate_probe(cp, cfg),
        ChargingMode::FullPower | ChargingMode::ReducedOffering => evaluate_charging(cp, cfg),
    }
}

/// Unplugged: drop to zero and claim the group's ramp-down slot once.
fn evaluate_unplugged(cp: &mut ChargePoint, group: &mut Group) -> Evaluation {
    cp.mode = ChargingMode::Idle;
    cp.current_targeted = PhaseCurrents::ZERO;
    if cp.current_assigned.l1 != 0 && group.try_set_pending(&cp.id) {
        info!(
            charge_point_id = cp.id.as_str(),
            group_id = group.id.as_str(),
            "Connector available, ramping down to 0A"
        );
    }
    Evaluation::Fixed
}

/// Offline: hold the last confirmed limit until the station has been gone
/// for longer than the threshold, then ramp down.
fn evaluate_unavailable(cp: &mut ChargePoint, group: &mut Group, cfg: &DlmConfig) -> Evaluation {
    cp.counters.offline_cycles = cp.counters.offline_cycles.saturating_add(1);

    if cp.counters.offline_cycles > cfg.offline_cycles_threshold && cp.current_assigned.l1 != 0 {
        cp.current_targeted = PhaseCurrents::ZERO;
        if group.try_set_pending(&cp.id) {
            info!(
                charge_point_id = cp.id.as_str(),
                group_id = group.id.as_str(),
                offline_cycles = cp.counters.offline_cycles,
                "Station offline too long, ramping down to 0A"
            );
        }
    } else {
        cp.current_targeted = cp.current_assigned;
    }
    Evaluation::Fixed
}

/// Plugged, vehicle finished: walk down to standby, then to zero once
/// standby is confirmed and nothing is drawn.
fn evaluate_done_charging(cp: &mut ChargePoint, cfg: &DlmConfig) -> Evaluation {
    let standby = PhaseCurrents::uniform(cfg.standby_current);
    let drawing = !cp.currents.is_zero();

    cp.current_targeted = if !drawing
        && (cp.current_assigned == standby || cp.current_assigned.is_zero())
    {
        PhaseCurrents::ZERO
    } else {
        standby
    };
    Evaluation::Fixed
}

fn evaluate_standby(cp: &mut ChargePoint, cfg: &DlmConfig) -> Evaluation {
    let max_drawn = cp.currents.max_phase();

    if max_drawn >= cfg.standby_current {
        cp.counters.maxing_power_cycles = cp.counters.maxing_power_cycles.saturating_add(1);
    } else {
        cp.counters.maxing_power_cycles = 0;
    }

    if max_drawn > cfg.standby_exit_current
        || cp.counters.maxing_power_cycles > cfg.ramp_up_cycles_threshold
    {
        info!(
            charge_point_id = cp.id.as_str(),
            max_drawn,
            probe_current = cfg.probe_current,
            "Vehicle demands more than standby, probing"
        );
        cp.mode = ChargingMode::ProbeRampUp;
        cp.reset_dlm_counters();
        cp.current_targeted = PhaseCurrents::uniform(cfg.probe_current);
        return Evaluation::Fixed;
    }

    cp.current_targeted = PhaseCurrents::uniform(cfg.standby_current);
    Evaluation::Fixed
}

/// Hold the probe limit until the station confirms it, then trust fair share.
fn evaluate_probe(cp: &mut ChargePoint, cfg: &DlmConfig) -> Evaluation {
    let probe = PhaseCurrents::uniform(cfg.probe_current);
    if cp.current_assigned == probe {
        debug!(charge_point_id = cp.id.as_str(), "Probe confirmed, full power");
        cp.mode = ChargingMode::FullPower;
        return Evaluation::WantsFullPower;
    }
    cp.current_targeted = probe;
    Evaluation::Fixed
}

fn evaluate_charging(cp: &mut ChargePoint, cfg: &DlmConfig) -> Evaluation {
    let max_drawn = cp.currents.max_phase();

    // Vehicle idles while nominally charging.
    if cp.status == ConnectorStatus::Charging && cp.currents.all_below(cfg.standby_current) {
        cp.counters.using_less_than_6a_cycles =
            cp.counters.using_less_than_6a_cycles.saturating_add(1);
    } else {
        cp.counters.using_less_than_6a_cycles = 0;
    }
    if cp.counters.using_less_than_6a_cycles > cfg.standby_cycles_threshold {
        return enter_standby(cp, cfg, "Drawing below standby current");
    }

    // Sustained under-use of the assigned limit.
    let assigned = cp.current_assigned.max_phase();
    if max_drawn.saturating_add(cfg.rampdown_offset) < assigned {
        cp.counters.not_using_max_cycles = cp.counters.not_using_max_cycles.saturating_add(1);
    } else {
        cp.counters.not_using_max_cycles = 0;
    }
    if cp.counters.not_using_max_cycles > cfg.rampdown_cycles_threshold {
        let reduced = max_drawn.saturating_add(cfg.rampdown_offset);
        if reduced <= cfg.standby_current {
            return enter_standby(cp, cfg, "Under-using assigned current");
        }
        info!(
            charge_point_id = cp.id.as_str(),
            assigned,
            max_drawn,
            reduced,
            "Under-using assigned current, reducing offer"
        );
        cp.mode = ChargingMode::ReducedOffering;
        cp.counters.not_using_max_cycles = 0;
        cp.counters.maxing_power_cycles = 0;
        cp.current_targeted = PhaseCurrents::uniform(reduced);
        return Evaluation::Fixed;
    }

    if cp.mode == ChargingMode::ReducedOffering {
        return evaluate_reduced(cp, cfg);
    }
    Evaluation::WantsFullPower
}

/// The station's own limiter, not ours, caps a reduced charger: it draws
/// exactly what it offers and offers exactly our target.
fn evaluate_reduced(cp: &mut ChargePoint, cfg: &DlmConfig) -> Evaluation {
    let target = cp.current_targeted.max_phase();
    let at_own_ceiling = cp.current_offered != 0
        && cp.currents.max_phase() == cp.current_offered
        && cp.current_offered == target;

    if at_own_ceiling {
        cp.counters.maxing_power_cycles = cp.counters.maxing_power_cycles.saturating_add(1);
    } else {
        cp.counters.maxing_power_cycles = 0;
    }

    if cp.counters.maxing_power_cycles > cfg.requalify_cycles_threshold {
        info!(
            charge_point_id = cp.id.as_str(),
            offered = cp.current_offered,
            "Reduced charger maxing its offer, back to full power"
        );
        cp.mode = ChargingMode::FullPower;
        cp.reset_dlm_counters();
        return Evaluation::WantsFullPower;
    }
    Evaluation::Fixed
}

fn enter_standby(cp: &mut ChargePoint, cfg: &DlmConfig, reason: &'static str) -> Evaluation {
    info!(
        charge_point_id = cp.id.as_str(),
        reason,
        standby_current = cfg.standby_current,
        "Entering standby"
    );
    cp.mode = ChargingMode::Standby;
    cp.reset_dlm_counters();
    cp.current_targeted = PhaseCurrents::uniform(cfg.standby_current);
    Evaluation::Fixed
}
