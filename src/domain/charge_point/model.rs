//! Charge Point domain entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::phase::{PhaseCurrents, PhasePower};

/// Status text a station sends with `Charging` once energy actually flows.
pub const ENERGY_FLOWING_INFO: &str = "Energy is flowing to vehicle";

/// Connector status as reported by the station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectorStatus {
    /// Nothing reported yet
    #[default]
    Unknown,
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    /// A vehicle is plugged in (whether or not it draws power).
    pub fn is_plugged(&self) -> bool {
        matches!(
            self,
            Self::Preparing
                | Self::Charging
                | Self::SuspendedEV
                | Self::SuspendedEVSE
                | Self::Finishing
        )
    }
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Available => "Available",
            Self::Preparing => "Preparing",
            Self::Charging => "Charging",
            Self::SuspendedEV => "SuspendedEV",
            Self::SuspendedEVSE => "SuspendedEVSE",
            Self::Finishing => "Finishing",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::Faulted => "Faulted",
        };
        f.write_str(s)
    }
}

/// Load-management state of the controlled connector.
///
/// Replaces the independent `onlyStandby` / `doneCharging` /
/// `reducedPowerOffering` flags: exactly one of these holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChargingMode {
    /// No admitted session; holds a zero limit.
    #[default]
    Idle,
    /// Takes part in the group fair share.
    FullPower,
    /// Deliberately capped below the fair share after sustained under-use.
    ReducedOffering,
    /// Minimal holding current while the vehicle draws next to nothing.
    Standby,
    /// One-off raised limit testing demand before returning to full power.
    ProbeRampUp,
    /// Plugged in, vehicle finished; walked down to zero.
    DoneCharging,
}

impl ChargingMode {
    pub fn only_standby(&self) -> bool {
        matches!(self, Self::Standby)
    }

    pub fn done_charging(&self) -> bool {
        matches!(self, Self::DoneCharging)
    }

    pub fn reduced_power_offering(&self) -> bool {
        matches!(self, Self::ReducedOffering)
    }
}

impl std::fmt::Display for ChargingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::FullPower => "FullPower",
            Self::ReducedOffering => "ReducedOffering",
            Self::Standby => "Standby",
            Self::ProbeRampUp => "ProbeRampUp",
            Self::DoneCharging => "DoneCharging",
        };
        f.write_str(s)
    }
}

/// Hysteresis counters, counted in DLM ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlmCounters {
    pub offline_cycles: u32,
    pub maxing_power_cycles: u32,
    pub not_using_max_cycles: u32,
    pub using_less_than_6a_cycles: u32,
}

impl DlmCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Charge Point entity (single controllable connector)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePoint {
    /// Station identity as presented on connect
    pub id: String,
    /// Owning load-management group
    pub group_id: String,
    /// Whether a WebSocket session is currently open
    #[serde(default)]
    pub online: bool,
    /// Status reported for connector 0 (the station itself)
    #[serde(default)]
    pub station_status: ConnectorStatus,
    /// Status of the controlled connector
    #[serde(default)]
    pub status: ConnectorStatus,
    pub status_info: Option<String>,
    pub error_code: Option<String>,
    /// Highest connector id ever reported
    #[serde(default)]
    pub connector_count: u32,

    /// Measured current per phase
    #[serde(default)]
    pub currents: PhaseCurrents,
    /// Station's own live ceiling
    #[serde(default)]
    pub current_offered: u32,
    #[serde(default)]
    pub power: PhasePower,
    /// Cumulative import register (Wh)
    #[serde(default)]
    pub energy_meter_current: i64,

    /// Last limit confirmed by the station
    #[serde(default)]
    pub current_assigned: PhaseCurrents,
    /// Limit the engine wants applied next
    #[serde(default)]
    pub current_targeted: PhaseCurrents,
    /// Operator pin, overrides the engine while set
    #[serde(default)]
    pub operator_limit: Option<u32>,
    /// Limit currently being pushed, if any
    #[serde(skip)]
    pub push_in_flight: Option<PhaseCurrents>,

    #[serde(default)]
    pub mode: ChargingMode,
    #[serde(default)]
    pub counters: DlmCounters,

    pub current_transaction: Option<i32>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ChargePoint {
    pub fn new(id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group_id: group_id.into(),
            online: false,
            station_status: ConnectorStatus::Unknown,
            status: ConnectorStatus::Unknown,
            status_info: None,
            error_code: None,
            connector_count: 0,
            currents: PhaseCurrents::ZERO,
            current_offered: 0,
            power: PhasePower::default(),
            energy_meter_current: 0,
            current_assigned: PhaseCurrents::ZERO,
            current_targeted: PhaseCurrents::ZERO,
            operator_limit: None,
            push_in_flight: None,
            mode: ChargingMode::Idle,
            counters: DlmCounters::default(),
            current_transaction: None,
            registered_at: Utc::now(),
            last_seen: None,
        }
    }

    /// The engine only drives stations with exactly one connector.
    pub fn is_controllable(&self) -> bool {
        self.connector_count == 1
    }

    pub fn has_transaction_in_progress(&self) -> bool {
        self.current_transaction.is_some()
    }

    /// A new limit should be pushed: target differs and nothing is in flight.
    pub fn needs_push(&self) -> bool {
        self.push_in_flight.is_none() && self.current_targeted != self.current_assigned
    }

    pub fn reset_dlm_counters(&mut self) {
        self.counters.reset();
    }

    pub fn set_online(&mut self) {
        self.online = true;
        self.last_seen = Some(Utc::now());
    }

    /// Connection closed; state is kept so a reconnect resumes it.
    pub fn set_disconnected(&mut self) {
        self.online = false;
        self.status = ConnectorStatus::Unavailable;
    }

    pub fn touch(&mut self) {
        self.last_seen = Some(Utc::now());
    }

    /// Zero the live measurements (fresh connection or reload).
    pub fn clear_live_telemetry(&mut self) {
        self.currents = PhaseCurrents::ZERO;
        self.power = PhasePower::default();
        self.current_offered = 0;
    }

    /// Apply a StatusNotification and the charging-mode changes it implies.
    pub fn update_status(
        &mut self,
        connector_id: u32,
        status: ConnectorStatus,
        info: Option<String>,
        error_code: Option<String>,
    ) {
        self.error_code = error_code;
        if connector_id == 0 {
            self.station_status = status;
            return;
        }
        self.connector_count = self.connector_count.max(connector_id);

        let energy_flowing = info.as_deref() == Some(ENERGY_FLOWING_INFO);
        self.status = status;
        self.status_info = info;

        self.mode = match (status, self.mode) {
            (ConnectorStatus::SuspendedEV, _) => ChargingMode::DoneCharging,
            (ConnectorStatus::SuspendedEVSE, ChargingMode::DoneCharging) => ChargingMode::Standby,
            (ConnectorStatus::Charging, ChargingMode::DoneCharging) if energy_flowing => {
                ChargingMode::Standby
            }
            (ConnectorStatus::Charging | ConnectorStatus::SuspendedEVSE, ChargingMode::Idle) => {
                ChargingMode::Standby
            }
            (ConnectorStatus::Available, _) => ChargingMode::Idle,
            (_, mode) => mode,
        };
    }

    /// Session admitted: hold the vehicle at standby until it shows demand.
    pub fn start_session(&mut self, transaction_id: i32) {
        self.current_transaction = Some(transaction_id);
        self.mode = ChargingMode::Standby;
        self.reset_dlm_counters();
    }

    pub fn stop_session(&mut self) {
        self.current_transaction = None;
        self.mode = ChargingMode::DoneCharging;
        self.reset_dlm_counters();
    }

    /// Accept a new register reading; returns false when it would go backwards.
    pub fn record_energy(&mut self, wh: i64) -> bool {
        if wh < self.energy_meter_current {
            return false;
        }
        self.energy_meter_current = wh;
        true
    }
}

// ── Tests ──────────────────────────────────────────────────────
