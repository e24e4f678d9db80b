//! Fleet state owned by the load-management actor.
//!
//! Everything here is synchronous and mutated from one task only: telemetry,
//! operator commands, push results and the tick all go through `&mut Fleet`.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::allocate::{allocate, Totals};
use super::evaluate::{evaluate, Evaluation};
use super::pusher::PushError;
use crate::application::events::*;
use crate::config::{DlmConfig, GroupsConfig};
use crate::domain::{
    group_id_for, ChargePoint, ConnectorStatus, DomainError, DomainResult, Group, Phase,
    PhaseCurrents, Transaction,
};

/// One decoded sampled value from MeterValues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeterReading {
    CurrentImport(Phase, u32),
    CurrentOffered(u32),
    /// Per phase, or the station total when no phase is given
    PowerImport(Option<Phase>, u32),
    EnergyImportRegister(i64),
}

/// A limit the tick wants committed to a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub charge_point_id: String,
    pub group_id: String,
    pub limits: PhaseCurrents,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmInfo {
    pub group_id: String,
    pub pending_owner: Option<String>,
    pub pending_ticks: u32,
}

/// Operator view of the whole fleet.
#[derive(Debug, Clone, Serialize)]
pub struct SystemState {
    pub charge_points: Vec<ChargePoint>,
    pub groups: Vec<Group>,
    pub totals: Totals,
    pub alarms: Vec<AlarmInfo>,
    pub active_transactions: usize,
}

/// Persisted form of the fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub charge_points: BTreeMap<String, ChargePoint>,
    pub groups: BTreeMap<String, Group>,
    pub transactions: BTreeMap<i32, Transaction>,
    pub next_transaction_id: i32,
}

pub struct Fleet {
    charge_points: HashMap<String, ChargePoint>,
    groups: HashMap<String, Group>,
    transactions: HashMap<i32, Transaction>,
    next_transaction_id: i32,
    totals: Totals,
    dlm: DlmConfig,
    groups_config: GroupsConfig,
    outbox: Vec<Event>,
}

impl Fleet {
    pub fn new(dlm: DlmConfig, groups_config: GroupsConfig) -> Self {
        Self {
            charge_points: HashMap::new(),
            groups: HashMap::new(),
            transactions: HashMap::new(),
            next_transaction_id: 1,
            totals: Totals::default(),
            dlm,
            groups_config,
            outbox: Vec::new(),
        }
    }

    /// Rebuild from a snapshot. Nobody is connected yet, live telemetry is
    /// stale and no push survives a restart.
    pub fn from_snapshot(snapshot: FleetSnapshot, dlm: DlmConfig, groups_config: GroupsConfig) -> Self {
        let mut fleet = Self::new(dlm, groups_config);

        for (id, mut cp) in snapshot.charge_points {
            cp.online = false;
            cp.status = ConnectorStatus::Unavailable;
            cp.push_in_flight = None;
            cp.clear_live_telemetry();
            fleet.charge_points.insert(id, cp);
        }
        for (id, mut group) in snapshot.groups {
            group.max = fleet.groups_config.capacity_for(&id);
            group.clear_pending();
            group.reset_aggregates();
            fleet.groups.insert(id, group);
        }
        let group_ids: Vec<String> = fleet.charge_points.values().map(|cp| cp.group_id.clone()).collect();
        for group_id in group_ids {
            fleet.ensure_group(&group_id);
        }

        let highest = snapshot.transactions.keys().copied().max().unwrap_or(0);
        fleet.transactions = snapshot.transactions.into_iter().collect();
        fleet.next_transaction_id = snapshot.next_transaction_id.max(highest + 1).max(1);
        fleet
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            charge_points: self
                .charge_points
                .iter()
                .map(|(id, cp)| (id.clone(), cp.clone()))
                .collect(),
            groups: self
                .groups
                .iter()
                .map(|(id, g)| (id.clone(), g.clone()))
                .collect(),
            transactions: self
                .transactions
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect(),
            next_transaction_id: self.next_transaction_id,
        }
    }

    /// Events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    pub fn charge_point(&self, id: &str) -> Option<&ChargePoint> {
        self.charge_points.get(id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn charge_points_sorted(&self) -> Vec<ChargePoint> {
        let mut list: Vec<ChargePoint> = self.charge_points.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn system_state(&self) -> SystemState {
        let mut groups: Vec<Group> = self.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        let alarms = groups
            .iter()
            .filter(|g| g.alarm)
            .map(|g| AlarmInfo {
                group_id: g.id.clone(),
                pending_owner: g.pending_owner.clone(),
                pending_ticks: g.pending_ticks,
            })
            .collect();

        SystemState {
            charge_points: self.charge_points_sorted(),
            groups,
            totals: self.totals,
            alarms,
            active_transactions: self.transactions.values().filter(|t| t.is_active()).count(),
        }
    }

    fn ensure_group(&mut self, group_id: &str) -> &mut Group {
        let capacity = self.groups_config.capacity_for(group_id);
        self.groups.entry(group_id.to_string()).or_insert_with(|| {
            info!(group_id, max = %capacity, "Created group");
            Group::new(group_id, capacity)
        })
    }

    fn charge_point_mut(&mut self, id: &str) -> DomainResult<&mut ChargePoint> {
        self.charge_points
            .get_mut(id)
            .ok_or_else(|| DomainError::charge_point_not_found(id))
    }

    // ── Telemetry ──────────────────────────────────────────────

    /// A station opened a session. Returns true for a never-seen station.
    pub fn connect(&mut self, id: &str, remote_addr: Option<String>) -> bool {
        let is_new = !self.charge_points.contains_key(id);
        if is_new {
            let group_id = group_id_for(id, self.groups_config.prefix_len);
            self.ensure_group(&group_id);
            self.charge_points
                .insert(id.to_string(), ChargePoint::new(id, group_id));
            info!(charge_point_id = id, "Registered new charge point");
        }

        let Some(cp) = self.charge_points.get_mut(id) else {
            return is_new;
        };
        cp.set_online();
        cp.clear_live_telemetry();
        let group_id = cp.group_id.clone();

        self.outbox.push(Event::ChargePointConnected(ChargePointConnectedEvent {
            charge_point_id: id.to_string(),
            group_id,
            remote_addr,
            timestamp: Utc::now(),
        }));
        is_new
    }

    pub fn disconnect(&mut self, id: &str) -> DomainResult<()> {
        let cp = self.charge_point_mut(id)?;
        cp.set_disconnected();
        self.outbox.push(Event::ChargePointDisconnected(ChargePointDisconnectedEvent {
            charge_point_id: id.to_string(),
            timestamp: Utc::now(),
        }));
        Ok(())
    }

    pub fn update_status(
        &mut self,
        id: &str,
        connector_id: u32,
        status: ConnectorStatus,
        info: Option<String>,
        error_code: Option<String>,
    ) -> DomainResult<()> {
        let cp = self.charge_point_mut(id)?;
        let previous_mode = cp.mode;
        cp.update_status(connector_id, status, info.clone(), error_code);
        cp.touch();
        if cp.mode != previous_mode {
            info!(
                charge_point_id = id,
                %status,
                from = %previous_mode,
                to = %cp.mode,
                "Charging mode changed by status"
            );
        }
        let mode = cp.mode.to_string();

        self.outbox.push(Event::ConnectorStatusChanged(ConnectorStatusChangedEvent {
            charge_point_id: id.to_string(),
            connector_id,
            status: status.to_string(),
            info,
            mode,
            timestamp: Utc::now(),
        }));
        Ok(())
    }

    pub fn record_meter_values(&mut self, id: &str, readings: &[MeterReading]) -> DomainResult<()> {
        let cp = self.charge_point_mut(id)?;
        for reading in readings {
            match *reading {
                MeterReading::CurrentImport(phase, amps) => cp.currents.set(phase, amps),
                MeterReading::CurrentOffered(amps) => cp.current_offered = amps,
                MeterReading::PowerImport(Some(Phase::L1), w) => cp.power.l1 = w,
                MeterReading::PowerImport(Some(Phase::L2), w) => cp.power.l2 = w,
                MeterReading::PowerImport(Some(Phase::L3), w) => cp.power.l3 = w,
                MeterReading::PowerImport(None, w) => cp.power.total = w,
                MeterReading::EnergyImportRegister(wh) => {
                    if !cp.record_energy(wh) {
                        warn!(
                            charge_point_id = id,
                            reading = wh,
                            current = cp.energy_meter_current,
                            "Energy register went backwards, ignored"
                        );
                    }
                }
            }
        }
        cp.touch();
        Ok(())
    }

    pub fn clear_live_telemetry(&mut self, id: &str) -> DomainResult<()> {
        self.charge_point_mut(id)?.clear_live_telemetry();
        Ok(())
    }

    pub fn start_transaction(
        &mut self,
        id: &str,
        connector_id: u32,
        id_tag: &str,
        meter_start: i32,
    ) -> DomainResult<Transaction> {
        let transaction_id = self.next_transaction_id;
        let cp = self.charge_point_mut(id)?;
        if let Some(active) = cp.current_transaction {
            return Err(DomainError::ConnectorBusy {
                charge_point_id: id.to_string(),
                connector_id,
                transaction_id: active,
            });
        }
        cp.start_session(transaction_id);

        let transaction = Transaction::new(transaction_id, id, connector_id, id_tag, meter_start);
        self.transactions.insert(transaction_id, transaction.clone());
        self.next_transaction_id += 1;

        info!(charge_point_id = id, transaction_id, id_tag, "Transaction started");
        self.outbox.push(Event::TransactionStarted(TransactionStartedEvent {
            charge_point_id: id.to_string(),
            transaction_id,
            id_tag: id_tag.to_string(),
            meter_start,
            timestamp: Utc::now(),
        }));
        Ok(transaction)
    }

    /// Close a transaction. The sending station always leaves its session,
    /// even when the transaction id is unknown (`Ok(None)`).
    pub fn stop_transaction(
        &mut self,
        id: &str,
        transaction_id: i32,
        meter_stop: i32,
        reason: Option<String>,
    ) -> DomainResult<Option<Transaction>> {
        self.charge_point_mut(id)?.stop_session();

        let Some(transaction) = self.transactions.get_mut(&transaction_id) else {
            warn!(charge_point_id = id, transaction_id, "Stop for unknown transaction");
            return Ok(None);
        };
        transaction.stop(meter_stop, reason.clone());
        let transaction = transaction.clone();
        let energy_wh = transaction.energy_consumed().unwrap_or(0);

        info!(charge_point_id = id, transaction_id, energy_wh, "Transaction stopped");
        self.outbox.push(Event::TransactionStopped(TransactionStoppedEvent {
            charge_point_id: id.to_string(),
            transaction_id,
            energy_wh,
            reason,
            timestamp: Utc::now(),
        }));
        Ok(Some(transaction))
    }

    pub fn reset_counters(&mut self, id: &str) -> DomainResult<()> {
        self.charge_point_mut(id)?.reset_dlm_counters();
        debug!(charge_point_id = id, "DLM counters reset");
        Ok(())
    }

    // ── Operator control ───────────────────────────────────────

    /// Pin a charger's target until cleared. Returns the applied, clamped limit.
    pub fn override_power_target(&mut self, id: &str, amps: u32) -> DomainResult<PhaseCurrents> {
        let cp = self
            .charge_points
            .get_mut(id)
            .ok_or_else(|| DomainError::charge_point_not_found(id))?;
        let group = self
            .groups
            .get_mut(&cp.group_id)
            .ok_or_else(|| DomainError::group_not_found(cp.group_id.clone()))?;

        let target = PhaseCurrents::uniform(amps).min(group.max);
        cp.operator_limit = Some(amps);
        cp.current_targeted = target;
        if !group.try_set_pending(id) && group.pending_owner.as_deref() != Some(id) {
            warn!(
                charge_point_id = id,
                group_id = group.id.as_str(),
                pending_owner = ?group.pending_owner,
                "Override set while another member holds the pending action"
            );
        }

        info!(charge_point_id = id, group_id = group.id.as_str(), %target, "Operator override set");
        Ok(target)
    }

    pub fn clear_power_override(&mut self, id: &str) -> DomainResult<()> {
        let cp = self.charge_point_mut(id)?;
        cp.operator_limit = None;
        info!(charge_point_id = id, "Operator override cleared");
        Ok(())
    }

    pub fn set_group_lockout(&mut self, group_id: &str, locked: bool) -> DomainResult<()> {
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| DomainError::group_not_found(group_id))?;
        group.locked_out = locked;
        warn!(group_id, locked, "Group lockout changed");
        Ok(())
    }

    pub fn clear_action_pending(&mut self, group_id: &str) -> DomainResult<()> {
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| DomainError::group_not_found(group_id))?;
        let had_alarm = group.alarm;
        let owner = group.pending_owner.clone();
        let ticks = group.pending_ticks;
        group.clear_pending();
        info!(group_id, ?owner, "Pending action cleared by operator");
        if had_alarm {
            self.outbox.push(alarm_event(false, group_id, owner, ticks, "cleared by operator"));
        }
        Ok(())
    }

    // ── Pushes ─────────────────────────────────────────────────

    /// Reserve a station for an out-of-tick push.
    pub fn begin_push(&mut self, id: &str, limits: PhaseCurrents) -> DomainResult<PushRequest> {
        let cp = self.charge_point_mut(id)?;
        if cp.push_in_flight.is_some() {
            return Err(DomainError::Validation(format!(
                "a limit push to {} is already in flight",
                id
            )));
        }
        cp.push_in_flight = Some(limits);
        Ok(PushRequest {
            charge_point_id: id.to_string(),
            group_id: cp.group_id.clone(),
            limits,
        })
    }

    /// Apply a finished push. Only a full success moves `current_assigned`.
    pub fn complete_push(&mut self, id: &str, limits: PhaseCurrents, result: &Result<(), PushError>) {
        let Some(cp) = self.charge_points.get_mut(id) else {
            error!(charge_point_id = id, "Push finished for unknown charge point");
            return;
        };
        cp.push_in_flight = None;

        match result {
            Ok(()) => {
                cp.current_assigned = limits;
                let group_id = cp.group_id.clone();
                self.outbox.push(Event::PushSucceeded(PushSucceededEvent {
                    charge_point_id: id.to_string(),
                    assigned: limits,
                    timestamp: Utc::now(),
                }));
                if let Some(group) = self.groups.get_mut(&group_id) {
                    let had_alarm = group.alarm;
                    let ticks = group.pending_ticks;
                    if group.resolve_pending(id) {
                        debug!(charge_point_id = id, group_id = group_id.as_str(), "Pending action resolved");
                        if had_alarm {
                            self.outbox.push(alarm_event(
                                false,
                                &group_id,
                                Some(id.to_string()),
                                ticks,
                                "pending push confirmed",
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                self.outbox.push(Event::PushFailed(PushFailedEvent {
                    charge_point_id: id.to_string(),
                    target: limits,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                }));
            }
        }
    }

    /// Clear a push that ended without an outcome. Assigned stays as it was.
    pub fn abandon_push(&mut self, id: &str, limits: PhaseCurrents) {
        let Some(cp) = self.charge_points.get_mut(id) else {
            return;
        };
        cp.push_in_flight = None;
        self.outbox.push(Event::PushFailed(PushFailedEvent {
            charge_point_id: id.to_string(),
            target: limits,
            error: "push aborted".to_string(),
            timestamp: Utc::now(),
        }));
    }

    // ── Tick ───────────────────────────────────────────────────

    /// One control cycle: evaluate, share, aggregate, check alarms, plan pushes.
    pub fn tick(&mut self) -> Vec<PushRequest> {
        let mut ids: Vec<String> = self.charge_points.keys().cloned().collect();
        ids.sort();
        let previous: HashMap<String, PhaseCurrents> = self
            .charge_points
            .iter()
            .map(|(id, cp)| (id.clone(), cp.current_targeted))
            .collect();

        // Per-charger evaluation
        let mut pools: HashMap<String, Vec<String>> = HashMap::new();
        let mut claimed: HashMap<String, PhaseCurrents> = HashMap::new();
        for id in &ids {
            let Some(cp) = self.charge_points.get_mut(id) else { continue };
            let Some(group) = self.groups.get_mut(&cp.group_id) else {
                error!(charge_point_id = id.as_str(), group_id = cp.group_id.as_str(), "Charge point has no group");
                continue;
            };
            if group.locked_out {
                continue;
            }
            let evaluation = if cp.is_controllable() {
                evaluate(cp, group, &self.dlm)
            } else {
                Evaluation::Skipped
            };
            match evaluation {
                Evaluation::WantsFullPower => {
                    pools.entry(group.id.clone()).or_default().push(id.clone());
                }
                Evaluation::Fixed | Evaluation::Skipped => {
                    let sum = claimed.entry(group.id.clone()).or_default();
                    *sum = sum.saturating_add(cp.current_targeted);
                }
            }
        }

        // Fair share
        let mut group_ids: Vec<String> = self.groups.keys().cloned().collect();
        group_ids.sort();
        for group_id in &group_ids {
            let Some(group) = self.groups.get_mut(group_id) else { continue };
            if group.locked_out {
                continue;
            }
            let pool = pools.get(group_id).map(Vec::as_slice).unwrap_or(&[]);
            let allocation = allocate(
                group,
                claimed.get(group_id).copied().unwrap_or_default(),
                pool.len(),
                self.dlm.max_current_per_charger,
            );
            group.offered_3phase = allocation.claimed;

            match allocation.share {
                None => debug!(group_id = group_id.as_str(), leftover = allocation.leftover, "No charger wants full power"),
                Some(share) => {
                    debug!(
                        group_id = group_id.as_str(),
                        leftover = allocation.leftover,
                        pool = pool.len(),
                        share,
                        "Fair share"
                    );
                    for id in pool {
                        if let Some(cp) = self.charge_points.get_mut(id) {
                            cp.current_targeted = PhaseCurrents::uniform(share);
                        }
                    }
                }
            }
        }

        self.aggregate();
        self.track_pending();

        for id in &ids {
            let Some(cp) = self.charge_points.get(id) else { continue };
            let before = previous.get(id).copied().unwrap_or_default();
            if cp.current_targeted != before {
                self.outbox.push(Event::TargetChanged(TargetChangedEvent {
                    charge_point_id: id.clone(),
                    group_id: cp.group_id.clone(),
                    previous: before,
                    target: cp.current_targeted,
                    mode: cp.mode.to_string(),
                    timestamp: Utc::now(),
                }));
            }
        }

        let pushes = self.plan_pushes(&group_ids);
        debug!(
            charge_points = ids.len(),
            pushes = pushes.len(),
            assigned = %self.totals.assigned,
            current = %self.totals.current,
            "DLM tick"
        );
        pushes
    }

    fn aggregate(&mut self) {
        for group in self.groups.values_mut() {
            group.assigned = PhaseCurrents::ZERO;
            group.current = PhaseCurrents::ZERO;
        }
        let mut totals = Totals::default();
        for cp in self.charge_points.values() {
            if let Some(group) = self.groups.get_mut(&cp.group_id) {
                group.assigned = group.assigned.saturating_add(cp.current_assigned);
                group.current = group.current.saturating_add(cp.currents);
            }
            totals.add(cp.current_assigned, cp.currents, cp.current_targeted);
        }
        self.totals = totals;
    }

    /// Age pending actions, settle ones with nothing left to push, raise
    /// the stuck alarm.
    fn track_pending(&mut self) {
        for group in self.groups.values_mut() {
            if !group.action_pending {
                continue;
            }
            let settled = group
                .pending_owner
                .as_deref()
                .and_then(|owner| self.charge_points.get(owner))
                .map(|cp| cp.push_in_flight.is_none() && cp.current_targeted == cp.current_assigned)
                .unwrap_or(false);
            if settled {
                let had_alarm = group.alarm;
                let owner = group.pending_owner.clone();
                let ticks = group.pending_ticks;
                group.clear_pending();
                if had_alarm {
                    self.outbox.push(alarm_event(false, &group.id, owner, ticks, "nothing left to push"));
                }
                continue;
            }

            group.pending_ticks = group.pending_ticks.saturating_add(1);
            if group.pending_ticks >= self.dlm.pending_alarm_ticks && !group.alarm {
                group.alarm = true;
                error!(
                    group_id = group.id.as_str(),
                    pending_owner = ?group.pending_owner,
                    pending_ticks = group.pending_ticks,
                    "Pending action stuck, ramp-down triggers suppressed"
                );
                self.outbox.push(alarm_event(
                    true,
                    &group.id,
                    group.pending_owner.clone(),
                    group.pending_ticks,
                    "pending action not confirmed",
                ));
            }
        }
    }

    /// Pick the pushes to send. When the worst case of old and new limits
    /// could exceed a group's capacity, only decreases go out this tick.
    fn plan_pushes(&mut self, group_ids: &[String]) -> Vec<PushRequest> {
        let mut members: HashMap<&str, Vec<&str>> = HashMap::new();
        for cp in self.charge_points.values() {
            members.entry(cp.group_id.as_str()).or_default().push(cp.id.as_str());
        }

        let mut selected: Vec<(String, String)> = Vec::new();
        for group_id in group_ids {
            let Some(group) = self.groups.get(group_id) else { continue };
            if group.locked_out {
                continue;
            }
            let mut ids = members.get(group_id.as_str()).cloned().unwrap_or_default();
            ids.sort_unstable();

            let worst: PhaseCurrents = ids
                .iter()
                .filter_map(|id| self.charge_points.get(*id))
                .map(|cp| {
                    cp.current_assigned
                        .max(cp.current_targeted)
                        .max(cp.push_in_flight.unwrap_or_default())
                })
                .sum();
            let increases_allowed = worst.fits_within(&group.max);
            if !increases_allowed {
                debug!(group_id = group_id.as_str(), %worst, max = %group.max, "Holding increases until decreases confirm");
            }

            for id in ids {
                let Some(cp) = self.charge_points.get(id) else { continue };
                if !cp.is_controllable() || !cp.online || !cp.needs_push() {
                    continue;
                }
                if increases_allowed || cp.current_targeted.fits_within(&cp.current_assigned) {
                    selected.push((cp.id.clone(), group_id.clone()));
                }
            }
        }

        selected
            .into_iter()
            .filter_map(|(id, group_id)| {
                let cp = self.charge_points.get_mut(&id)?;
                cp.push_in_flight = Some(cp.current_targeted);
                Some(PushRequest {
                    charge_point_id: id,
                    group_id,
                    limits: cp.current_targeted,
                })
            })
            .collect()
    }
}

fn alarm_event(raised: bool, group_id: &str, owner: Option<String>, ticks: u32, message: &str) -> Event {
    let event = DlmAlarmEvent {
        group_id: group_id.to_string(),
        pending_owner: owner,
        pending_ticks: ticks,
        message: message.to_string(),
        timestamp: Utc::now(),
    };
    if raised {
        Event::DlmAlarmRaised(event)
    } else {
        Event::DlmAlarmCleared(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::CommandError;
    use crate::application::ports::GenericStatus;
    use crate::domain::ChargingMode;

    fn fleet() -> Fleet {
        Fleet::new(DlmConfig::default(), GroupsConfig::default())
    }

    /// Online single-connector charger in the given state.
    fn add(fleet: &mut Fleet, id: &str, status: ConnectorStatus, mode: ChargingMode) {
        fleet.connect(id, None);
        fleet.update_status(id, 1, status, None, None).unwrap();
        fleet.charge_points.get_mut(id).unwrap().mode = mode;
    }

    fn cp<'a>(fleet: &'a Fleet, id: &str) -> &'a ChargePoint {
        fleet.charge_point(id).unwrap()
    }

    /// Confirm every planned push.
    fn confirm(fleet: &mut Fleet, pushes: &[PushRequest]) {
        for p in pushes {
            fleet.complete_push(&p.charge_point_id, p.limits, &Ok(()));
        }
    }

    fn rejected(phase: Phase) -> Result<(), PushError> {
        Err(PushError::Rejected {
            phase,
            status: GenericStatus::Rejected,
        })
    }

    fn assert_capacity(fleet: &Fleet) {
        for group in fleet.groups.values() {
            let assigned: PhaseCurrents = fleet
                .charge_points
                .values()
                .filter(|cp| cp.group_id == group.id)
                .map(|cp| cp.current_assigned)
                .sum();
            assert!(
                assigned.fits_within(&group.max),
                "group {} assigned {} over {}",
                group.id,
                assigned,
                group.max
            );
        }
    }

    #[test]
    fn connect_creates_group_from_prefix() {
        let mut fleet = fleet();
        assert!(fleet.connect("A001", None));
        assert!(!fleet.connect("A001", None));
        fleet.connect("A002", None);
        fleet.connect("B001", None);

        assert_eq!(cp(&fleet, "A002").group_id, "A");
        assert_eq!(fleet.group("A").unwrap().max, PhaseCurrents::uniform(32));
        assert!(fleet.group("B").is_some());
        assert_eq!(fleet.groups.len(), 2);
    }

    #[test]
    fn telemetry_for_unknown_station_is_an_error() {
        let mut fleet = fleet();
        assert!(fleet
            .update_status("Z1", 1, ConnectorStatus::Charging, None, None)
            .is_err());
        assert!(fleet
            .record_meter_values("Z1", &[MeterReading::CurrentOffered(16)])
            .is_err());
        // Tick still runs.
        assert!(fleet.tick().is_empty());
    }

    #[test]
    fn meter_values_map_onto_charge_point() {
        let mut fleet = fleet();
        fleet.connect("A001", None);
        fleet
            .record_meter_values(
                "A001",
                &[
                    MeterReading::CurrentImport(Phase::L2, 13),
                    MeterReading::CurrentOffered(16),
                    MeterReading::PowerImport(Some(Phase::L1), 3000),
                    MeterReading::PowerImport(None, 9000),
                    MeterReading::EnergyImportRegister(5000),
                    MeterReading::EnergyImportRegister(4000),
                ],
            )
            .unwrap();
        let cp = cp(&fleet, "A001");
        assert_eq!(cp.currents, PhaseCurrents::new(0, 13, 0));
        assert_eq!(cp.current_offered, 16);
        assert_eq!(cp.power.l1, 3000);
        assert_eq!(cp.power.total, 9000);
        assert_eq!(cp.energy_meter_current, 5000);
    }

    #[test]
    fn two_full_power_chargers_split_32a() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        add(&mut fleet, "A002", ConnectorStatus::Charging, ChargingMode::FullPower);

        let pushes = fleet.tick();
        assert_eq!(pushes.len(), 2);
        assert!(pushes.iter().all(|p| p.limits == PhaseCurrents::uniform(16)));
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::uniform(16));
        // Nothing is assigned before confirmation.
        assert_eq!(cp(&fleet, "A001").current_assigned, PhaseCurrents::ZERO);

        confirm(&mut fleet, &pushes);
        assert_eq!(cp(&fleet, "A002").current_assigned, PhaseCurrents::uniform(16));
        assert_capacity(&fleet);
    }

    #[test]
    fn standby_members_are_claimed_before_sharing() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::Standby);
        add(&mut fleet, "A002", ConnectorStatus::Charging, ChargingMode::FullPower);
        add(&mut fleet, "A003", ConnectorStatus::Charging, ChargingMode::FullPower);

        fleet.tick();
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::uniform(6));
        assert_eq!(cp(&fleet, "A002").current_targeted, PhaseCurrents::uniform(13));
        assert_eq!(fleet.group("A").unwrap().offered_3phase, PhaseCurrents::uniform(6));
    }

    #[test]
    fn in_flight_push_is_not_duplicated() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        assert_eq!(fleet.tick().len(), 1);
        assert!(fleet.tick().is_empty());
    }

    #[test]
    fn failed_push_leaves_assignment_and_retries() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        let pushes = fleet.tick();
        fleet.complete_push("A001", pushes[0].limits, &rejected(Phase::L2));

        assert_eq!(cp(&fleet, "A001").current_assigned, PhaseCurrents::ZERO);
        assert!(cp(&fleet, "A001").push_in_flight.is_none());
        let events = fleet.drain_events();
        assert!(events.iter().any(|e| matches!(e, Event::PushFailed(_))));

        let retry = fleet.tick();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].limits, PhaseCurrents::uniform(16));
    }

    #[test]
    fn abandoned_push_frees_the_charger() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        let pushes = fleet.tick();
        fleet.abandon_push("A001", pushes[0].limits);

        assert!(cp(&fleet, "A001").push_in_flight.is_none());
        assert_eq!(cp(&fleet, "A001").current_assigned, PhaseCurrents::ZERO);
        assert_eq!(fleet.tick().len(), 1);
    }

    #[test]
    fn unplug_sets_pending_until_push_confirms() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        add(&mut fleet, "A002", ConnectorStatus::Charging, ChargingMode::FullPower);
        let pushes = fleet.tick();
        confirm(&mut fleet, &pushes);

        fleet
            .update_status("A001", 1, ConnectorStatus::Available, None, None)
            .unwrap();
        let pushes = fleet.tick();
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::ZERO);
        assert!(fleet.group("A").unwrap().action_pending);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].charge_point_id, "A001");

        // Push fails: pending stays, target stays zero.
        fleet.complete_push("A001", PhaseCurrents::ZERO, &rejected(Phase::L1));
        fleet.tick();
        assert!(fleet.group("A").unwrap().action_pending);
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::ZERO);

        fleet.complete_push("A001", PhaseCurrents::ZERO, &Ok(()));
        assert!(!fleet.group("A").unwrap().action_pending);
        assert_eq!(cp(&fleet, "A001").current_assigned, PhaseCurrents::ZERO);
    }

    #[test]
    fn increases_wait_for_decreases() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        add(&mut fleet, "A002", ConnectorStatus::Charging, ChargingMode::FullPower);
        let pushes = fleet.tick();
        confirm(&mut fleet, &pushes);

        // A third charger joins the pool: 16 -> 10 for the others, 0 -> 10 for it.
        add(&mut fleet, "A003", ConnectorStatus::Charging, ChargingMode::FullPower);
        let pushes = fleet.tick();
        let ids: Vec<&str> = pushes.iter().map(|p| p.charge_point_id.as_str()).collect();
        assert_eq!(ids, vec!["A001", "A002"]);
        assert!(pushes.iter().all(|p| p.limits == PhaseCurrents::uniform(10)));
        confirm(&mut fleet, &pushes);
        assert_capacity(&fleet);

        let pushes = fleet.tick();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].charge_point_id, "A003");
        confirm(&mut fleet, &pushes);
        assert_capacity(&fleet);
    }

    #[test]
    fn capacity_holds_through_mixed_outcomes() {
        let mut fleet = fleet();
        for i in 1..=5 {
            add(&mut fleet, &format!("A00{i}"), ConnectorStatus::Charging, ChargingMode::FullPower);
        }
        for round in 0..12 {
            if round == 3 {
                fleet
                    .update_status("A002", 1, ConnectorStatus::Available, None, None)
                    .unwrap();
            }
            if round == 6 {
                fleet.charge_points.get_mut("A004").unwrap().mode = ChargingMode::Standby;
            }
            let pushes = fleet.tick();
            for (n, p) in pushes.iter().enumerate() {
                let result = if (round + n) % 3 == 0 {
                    rejected(Phase::L2)
                } else {
                    Ok(())
                };
                fleet.complete_push(&p.charge_point_id, p.limits, &result);
                assert_capacity(&fleet);
            }
        }
    }

    #[test]
    fn stuck_pending_raises_alarm() {
        let mut fleet = Fleet::new(
            DlmConfig {
                pending_alarm_ticks: 3,
                ..DlmConfig::default()
            },
            GroupsConfig::default(),
        );
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        let pushes = fleet.tick();
        confirm(&mut fleet, &pushes);
        fleet.disconnect("A001").unwrap();
        fleet.connect("A001", None);
        fleet
            .update_status("A001", 1, ConnectorStatus::Available, None, None)
            .unwrap();

        let pushes = fleet.tick();
        fleet.drain_events();
        // Push never resolves.
        let _ = pushes;
        fleet.tick();
        fleet.tick();
        let group = fleet.group("A").unwrap();
        assert!(group.alarm);
        assert_eq!(fleet.system_state().alarms.len(), 1);
        assert!(fleet
            .drain_events()
            .iter()
            .any(|e| matches!(e, Event::DlmAlarmRaised(_))));

        fleet.clear_action_pending("A").unwrap();
        assert!(!fleet.group("A").unwrap().alarm);
        assert!(fleet
            .drain_events()
            .iter()
            .any(|e| matches!(e, Event::DlmAlarmCleared(_))));
    }

    #[test]
    fn locked_out_group_is_left_alone() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        fleet.set_group_lockout("A", true).unwrap();
        assert!(fleet.tick().is_empty());
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::ZERO);
    }

    #[test]
    fn offline_station_is_not_pushed() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        fleet.charge_points.get_mut("A001").unwrap().online = false;
        assert!(fleet.tick().is_empty());
    }

    #[test]
    fn override_pins_target_and_sets_pending() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        add(&mut fleet, "A002", ConnectorStatus::Charging, ChargingMode::FullPower);

        let applied = fleet.override_power_target("A001", 40).unwrap();
        assert_eq!(applied, PhaseCurrents::uniform(32));
        assert!(fleet.group("A").unwrap().action_pending);

        fleet.override_power_target("A001", 10).unwrap();
        let pushes = fleet.tick();
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::uniform(10));
        assert_eq!(cp(&fleet, "A002").current_targeted, PhaseCurrents::uniform(16));
        confirm(&mut fleet, &pushes);
        assert!(!fleet.group("A").unwrap().action_pending);

        fleet.clear_power_override("A001").unwrap();
        fleet.tick();
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::uniform(16));
    }

    #[test]
    fn override_leaves_foreign_pending_owner() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        add(&mut fleet, "A002", ConnectorStatus::Charging, ChargingMode::FullPower);

        fleet.override_power_target("A002", 8).unwrap();
        fleet.override_power_target("A001", 10).unwrap();

        let group = fleet.group("A").unwrap();
        assert!(group.action_pending);
        assert_eq!(group.pending_owner.as_deref(), Some("A002"));
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::uniform(10));
    }

    #[test]
    fn unplug_ramps_down_through_override() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        fleet.override_power_target("A001", 12).unwrap();
        let pushes = fleet.tick();
        confirm(&mut fleet, &pushes);
        assert_eq!(cp(&fleet, "A001").current_assigned, PhaseCurrents::uniform(12));
        assert!(!fleet.group("A").unwrap().action_pending);

        fleet
            .update_status("A001", 1, ConnectorStatus::Available, None, None)
            .unwrap();
        let pushes = fleet.tick();
        assert_eq!(cp(&fleet, "A001").current_targeted, PhaseCurrents::ZERO);
        assert!(fleet.group("A").unwrap().action_pending);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].limits, PhaseCurrents::ZERO);

        confirm(&mut fleet, &pushes);
        assert_eq!(cp(&fleet, "A001").current_assigned, PhaseCurrents::ZERO);
        assert!(!fleet.group("A").unwrap().action_pending);
    }

    #[test]
    fn second_transaction_on_busy_connector_is_rejected() {
        let mut fleet = fleet();
        fleet.connect("A001", None);
        let tx = fleet.start_transaction("A001", 1, "04A1B2", 100).unwrap();
        assert_eq!(tx.id, 1);
        assert_eq!(cp(&fleet, "A001").mode, ChargingMode::Standby);
        assert!(matches!(
            fleet.start_transaction("A001", 1, "04A1B2", 100),
            Err(DomainError::ConnectorBusy { transaction_id: 1, .. })
        ));

        let stopped = fleet.stop_transaction("A001", 1, 2100, None).unwrap().unwrap();
        assert_eq!(stopped.energy_consumed(), Some(2000));
        assert_eq!(cp(&fleet, "A001").mode, ChargingMode::DoneCharging);
        assert_eq!(fleet.start_transaction("A001", 1, "04A1B2", 0).unwrap().id, 2);
    }

    #[test]
    fn stop_for_unknown_transaction_still_ends_session() {
        let mut fleet = fleet();
        fleet.connect("A001", None);
        assert!(fleet.stop_transaction("A001", 99, 0, None).unwrap().is_none());
        assert_eq!(cp(&fleet, "A001").mode, ChargingMode::DoneCharging);
    }

    #[test]
    fn begin_push_refuses_when_busy() {
        let mut fleet = fleet();
        fleet.connect("A001", None);
        fleet.begin_push("A001", PhaseCurrents::ZERO).unwrap();
        assert!(fleet.begin_push("A001", PhaseCurrents::ZERO).is_err());
        fleet.complete_push(
            "A001",
            PhaseCurrents::ZERO,
            &Err(PushError::Transport {
                phase: Phase::L1,
                source: CommandError::Timeout,
            }),
        );
        assert!(fleet.begin_push("A001", PhaseCurrents::ZERO).is_ok());
    }

    #[test]
    fn snapshot_reload_starts_offline_and_clean() {
        let mut fleet = fleet();
        add(&mut fleet, "A001", ConnectorStatus::Charging, ChargingMode::FullPower);
        fleet.record_meter_values("A001", &[MeterReading::CurrentImport(Phase::L1, 15)]).unwrap();
        let pushes = fleet.tick();
        confirm(&mut fleet, &pushes);
        fleet.start_transaction("A001", 1, "tag", 0).unwrap();
        fleet.group_mut_for_test("A").try_set_pending("A001");

        let json = serde_json::to_string(&fleet.snapshot()).unwrap();
        let snapshot: FleetSnapshot = serde_json::from_str(&json).unwrap();
        let reloaded = Fleet::from_snapshot(snapshot, DlmConfig::default(), GroupsConfig::default());

        let cp = reloaded.charge_point("A001").unwrap();
        assert!(!cp.online);
        assert_eq!(cp.status, ConnectorStatus::Unavailable);
        assert_eq!(cp.currents, PhaseCurrents::ZERO);
        assert_eq!(cp.current_assigned, PhaseCurrents::uniform(16));
        assert!(!reloaded.group("A").unwrap().action_pending);
        assert_eq!(reloaded.next_transaction_id, 2);
    }

    impl Fleet {
        fn group_mut_for_test(&mut self, id: &str) -> &mut Group {
            self.groups.get_mut(id).unwrap()
        }
    }
}
