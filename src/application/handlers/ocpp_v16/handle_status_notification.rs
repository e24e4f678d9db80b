//! StatusNotification handler

use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::types::{ChargePointErrorCode, ChargePointStatus};
use serde_json::Value;
use tracing::{info, warn};

use super::{parse_request, to_payload, ActionResult};
use crate::application::OcppHandlerV16;
use crate::domain::ConnectorStatus;

pub async fn handle_status_notification(handler: &OcppHandlerV16, payload: &Value) -> ActionResult {
    let req: StatusNotificationRequest = parse_request(handler, "StatusNotification", payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        connector_id = req.connector_id,
        status = ?req.status,
        error_code = ?req.error_code,
        info = ?req.info,
        "StatusNotification"
    );

    let error_code = match req.error_code {
        ChargePointErrorCode::NoError => None,
        other => Some(format!("{:?}", other)),
    };

    if let Err(e) = handler
        .dlm
        .status_notification(
            &handler.charge_point_id,
            req.connector_id,
            connector_status(&req.status),
            req.info.clone(),
            error_code,
        )
        .await
    {
        warn!(charge_point_id = handler.charge_point_id.as_str(), error = %e, "Status not delivered");
    }

    to_payload(&StatusNotificationResponse {})
}

pub fn connector_status(status: &ChargePointStatus) -> ConnectorStatus {
    match status {
        ChargePointStatus::Available => ConnectorStatus::Available,
        ChargePointStatus::Preparing => ConnectorStatus::Preparing,
        ChargePointStatus::Charging => ConnectorStatus::Charging,
        ChargePointStatus::SuspendedEV => ConnectorStatus::SuspendedEV,
        ChargePointStatus::SuspendedEVSE => ConnectorStatus::SuspendedEVSE,
        ChargePointStatus::Finishing => ConnectorStatus::Finishing,
        ChargePointStatus::Reserved => ConnectorStatus::Reserved,
        ChargePointStatus::Unavailable => ConnectorStatus::Unavailable,
        ChargePointStatus::Faulted => ConnectorStatus::Faulted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_statuses_map_to_connector_status() {
        let status: ChargePointStatus = serde_json::from_str("\"SuspendedEVSE\"").unwrap();
        assert_eq!(connector_status(&status), ConnectorStatus::SuspendedEVSE);
        let status: ChargePointStatus = serde_json::from_str("\"Available\"").unwrap();
        assert_eq!(connector_status(&status), ConnectorStatus::Available);
    }
}
