//! Outbound port: commands from the central system to a charge point
//!
//! The load-management engine, provisioning and the operator API only see
//! [`ChargePointCommands`]. The production implementation is
//! [`CommandDispatcher`](crate::application::commands::CommandDispatcher);
//! tests script their own.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::commands::CommandError;

/// Command response status, normalised across OCPP response types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenericStatus {
    Accepted,
    Rejected,
    RebootRequired,
    NotSupported,
    Unlocked,
    UnlockFailed,
    Unknown(String),
}

impl GenericStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "Accepted" => Self::Accepted,
            "Rejected" => Self::Rejected,
            "RebootRequired" => Self::RebootRequired,
            "NotSupported" => Self::NotSupported,
            "Unlocked" => Self::Unlocked,
            "UnlockFailed" => Self::UnlockFailed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The station applied the request.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted | Self::Unlocked)
    }
}

impl std::fmt::Display for GenericStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Rejected => write!(f, "Rejected"),
            Self::RebootRequired => write!(f, "RebootRequired"),
            Self::NotSupported => write!(f, "NotSupported"),
            Self::Unlocked => write!(f, "Unlocked"),
            Self::UnlockFailed => write!(f, "UnlockFailed"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Messages a station can be asked to send right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    BootNotification,
    DiagnosticsStatusNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
}

#[async_trait]
pub trait ChargePointCommands: Send + Sync {
    async fn change_configuration(
        &self,
        charge_point_id: &str,
        key: &str,
        value: &str,
    ) -> Result<GenericStatus, CommandError>;

    async fn unlock_connector(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Result<GenericStatus, CommandError>;

    async fn remote_start_transaction(
        &self,
        charge_point_id: &str,
        id_tag: &str,
        connector_id: Option<u32>,
    ) -> Result<GenericStatus, CommandError>;

    async fn remote_stop_transaction(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
    ) -> Result<GenericStatus, CommandError>;

    async fn trigger_message(
        &self,
        charge_point_id: &str,
        requested_message: TriggerType,
        connector_id: Option<u32>,
    ) -> Result<GenericStatus, CommandError>;
}

pub type SharedChargePointCommands = Arc<dyn ChargePointCommands>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_statuses() {
        assert_eq!(GenericStatus::from_str("Accepted"), GenericStatus::Accepted);
        assert_eq!(GenericStatus::from_str("NotSupported"), GenericStatus::NotSupported);
        assert_eq!(
            GenericStatus::from_str("Weird"),
            GenericStatus::Unknown("Weird".into())
        );
    }

    #[test]
    fn reboot_required_is_not_accepted() {
        assert!(!GenericStatus::RebootRequired.is_accepted());
        assert!(GenericStatus::Unlocked.is_accepted());
        assert!(!GenericStatus::UnlockFailed.is_accepted());
    }
}
