//! BootNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde_json::Value;
use tracing::info;

use super::{parse_request, to_payload, ActionResult};
use crate::application::OcppHandlerV16;

pub async fn handle_boot_notification(handler: &OcppHandlerV16, payload: &Value) -> ActionResult {
    let req: BootNotificationRequest = parse_request(handler, "BootNotification", payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        vendor = req.charge_point_vendor.as_str(),
        model = req.charge_point_model.as_str(),
        serial = ?req.charge_point_serial_number,
        firmware = ?req.firmware_version,
        "BootNotification"
    );

    to_payload(&BootNotificationResponse {
        current_time: Utc::now(),
        interval: handler.heartbeat_interval.try_into().unwrap_or(60),
        status: RegistrationStatus::Accepted,
    })
}
