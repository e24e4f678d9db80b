//! Notification events
//!
//! Facts published on the event bus for the `/events` stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::phase::PhaseCurrents;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    ChargePointConnected(ChargePointConnectedEvent),
    ChargePointDisconnected(ChargePointDisconnectedEvent),
    ConnectorStatusChanged(ConnectorStatusChangedEvent),
    TransactionStarted(TransactionStartedEvent),
    TransactionStopped(TransactionStoppedEvent),
    TargetChanged(TargetChangedEvent),
    PushSucceeded(PushSucceededEvent),
    PushFailed(PushFailedEvent),
    DlmAlarmRaised(DlmAlarmEvent),
    DlmAlarmCleared(DlmAlarmEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ChargePointConnected(_) => "charge_point_connected",
            Event::ChargePointDisconnected(_) => "charge_point_disconnected",
            Event::ConnectorStatusChanged(_) => "connector_status_changed",
            Event::TransactionStarted(_) => "transaction_started",
            Event::TransactionStopped(_) => "transaction_stopped",
            Event::TargetChanged(_) => "target_changed",
            Event::PushSucceeded(_) => "push_succeeded",
            Event::PushFailed(_) => "push_failed",
            Event::DlmAlarmRaised(_) => "dlm_alarm_raised",
            Event::DlmAlarmCleared(_) => "dlm_alarm_cleared",
        }
    }

    /// Charge point the event concerns; group-level alarms carry the owner.
    pub fn charge_point_id(&self) -> Option<&str> {
        match self {
            Event::ChargePointConnected(e) => Some(&e.charge_point_id),
            Event::ChargePointDisconnected(e) => Some(&e.charge_point_id),
            Event::ConnectorStatusChanged(e) => Some(&e.charge_point_id),
            Event::TransactionStarted(e) => Some(&e.charge_point_id),
            Event::TransactionStopped(e) => Some(&e.charge_point_id),
            Event::TargetChanged(e) => Some(&e.charge_point_id),
            Event::PushSucceeded(e) => Some(&e.charge_point_id),
            Event::PushFailed(e) => Some(&e.charge_point_id),
            Event::DlmAlarmRaised(e) | Event::DlmAlarmCleared(e) => e.pending_owner.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePointConnectedEvent {
    pub charge_point_id: String,
    pub group_id: String,
    pub remote_addr: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePointDisconnectedEvent {
    pub charge_point_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorStatusChangedEvent {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub status: String,
    pub info: Option<String>,
    pub mode: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStartedEvent {
    pub charge_point_id: String,
    pub transaction_id: i32,
    pub id_tag: String,
    pub meter_start: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStoppedEvent {
    pub charge_point_id: String,
    pub transaction_id: i32,
    pub energy_wh: i64,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetChangedEvent {
    pub charge_point_id: String,
    pub group_id: String,
    pub previous: PhaseCurrents,
    pub target: PhaseCurrents,
    pub mode: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSucceededEvent {
    pub charge_point_id: String,
    pub assigned: PhaseCurrents,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFailedEvent {
    pub charge_point_id: String,
    pub target: PhaseCurrents,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlmAlarmEvent {
    pub group_id: String,
    pub pending_owner: Option<String>,
    pub pending_ticks: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Envelope sent to `/events` subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: u64,
    #[serde(flatten)]
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_tagged() {
        let event = Event::PushFailed(PushFailedEvent {
            charge_point_id: "A001".into(),
            target: PhaseCurrents::uniform(16),
            error: "timeout".into(),
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PushFailed");
        assert_eq!(json["data"]["target"]["l1"], 16);
        assert_eq!(event.event_type(), "push_failed");
        assert_eq!(event.charge_point_id(), Some("A001"));
    }

    #[test]
    fn alarm_points_at_pending_owner() {
        let event = Event::DlmAlarmRaised(DlmAlarmEvent {
            group_id: "A".into(),
            pending_owner: Some("A002".into()),
            pending_ticks: 30,
            message: "stuck".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(event.charge_point_id(), Some("A002"));
    }
}
